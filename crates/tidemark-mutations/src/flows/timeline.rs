//! Timeline events: roll-up insertion.
//!
//! Consecutive events by the same actor within a short window collapse
//! instead of stacking: a chain of title edits shows as one event spanning
//! the first old title to the newest, and inverse pairs (resolve then
//! unresolve, pin then unpin) cancel out entirely.

use chrono::Duration;

use tidemark_store::{CacheStore, Paginated, QueryKey};

use crate::records::{TimelineAction, TimelineEvent};

/// Window within which consecutive events by one actor roll up.
pub const ROLLUP_WINDOW_SECS: i64 = 60;

/// Key of one post's timeline query.
pub fn timeline_key(org: &str, post_id: &str) -> QueryKey {
    QueryKey::of(["orgs", org, "posts", post_id, "timeline"])
}

fn rolls_up_with(action: TimelineAction, prior: TimelineAction) -> bool {
    match action {
        TimelineAction::SubjectTitleUpdated => prior == TimelineAction::SubjectTitleUpdated,
        other => other.inverse() == Some(prior),
    }
}

/// Insert `event`, rolling it up against the most recent matching event.
///
/// Unmatched events append to the last page (server ordering is oldest
/// first). No-ops when the timeline was never fetched.
pub fn insert_rolled_up(store: &CacheStore, key: &QueryKey, event: TimelineEvent) -> bool {
    store.update::<Paginated<TimelineEvent>>(key, |timeline| {
        let window = Duration::seconds(ROLLUP_WINDOW_SECS);

        // Most recent prior event this one rolls up with.
        let mut candidate: Option<(usize, usize)> = None;
        for (page_index, page) in timeline.pages.iter().enumerate() {
            for (item_index, prior) in page.items.iter().enumerate() {
                if event.created_at - prior.created_at >= window {
                    continue;
                }
                if prior.actor.id != event.actor.id {
                    continue;
                }
                if !rolls_up_with(event.action, prior.action) {
                    continue;
                }
                let newer = match candidate {
                    Some((p, i)) => prior.created_at > timeline.pages[p].items[i].created_at,
                    None => true,
                };
                if newer {
                    candidate = Some((page_index, item_index));
                }
            }
        }

        match candidate {
            Some((page_index, item_index)) => {
                let prior = timeline.pages[page_index].items.remove(item_index);
                if event.action == TimelineAction::SubjectTitleUpdated {
                    // Chain the edits: span from the earliest old title at
                    // the earlier timestamp.
                    let mut rolled = event.clone();
                    rolled.from_title = prior.from_title;
                    rolled.created_at = prior.created_at;
                    append(timeline, rolled);
                }
                // Inverse pairs annihilate; nothing is appended.
            }
            None => append(timeline, event.clone()),
        }
    })
}

fn append(timeline: &mut Paginated<TimelineEvent>, event: TimelineEvent) {
    match timeline.pages.last_mut() {
        Some(last) => last.items.push(event),
        None => timeline
            .pages
            .push(tidemark_store::Page::new(vec![event], None)),
    }
}
