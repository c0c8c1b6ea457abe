//! Typed records from the collaboration app.
//!
//! The cache core treats these as opaque: each one declares its identity
//! through [`Entity`] and its embedded entities through [`Normalize`], and
//! everything else about the shape belongs to the server.

use std::any::Any;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tidemark_store::normalize::{rewrite_leaf, visit_leaf};
use tidemark_store::{AnyEntity, Entity, EntityKey, Normalize};

/// Organization member as embedded in posts, messages and timeline events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub display_name: String,
}

impl Entity for Member {
    const KIND: &'static str = "member";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Normalize for Member {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        visit_leaf(self, visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        rewrite_leaf(self, key, patch)
    }
}

/// Channel-like project that posts and chat threads live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub archived: bool,
    pub private: bool,
    pub contributors_count: u64,
    pub viewer_has_favorited: bool,
    pub unread_for_viewer: bool,
    pub last_activity_at: DateTime<Utc>,
}

impl Entity for Project {
    const KIND: &'static str = "project";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Normalize for Project {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        visit_leaf(self, visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        rewrite_leaf(self, key, patch)
    }
}

/// One emoji bucket on a post or message.
///
/// Not an entity of its own: it lives and dies with its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedReaction {
    pub emoji: String,
    pub reactions_count: u64,
    /// Id of the viewer's own reaction in this bucket; a client id until
    /// the server confirms.
    pub viewer_reaction_id: Option<String>,
}

/// Feed post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub author: Member,
    pub comments_count: u64,
    pub grouped_reactions: Vec<GroupedReaction>,
    pub viewer_has_favorited: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for Post {
    const KIND: &'static str = "post";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Normalize for Post {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        visit_leaf(self, visitor);
        self.author.visit(visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        let mut hit = rewrite_leaf(self, key, patch);
        hit |= self.author.rewrite(key, patch);
        hit
    }
}

/// Inbox notification row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub read: bool,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for Notification {
    const KIND: &'static str = "notification";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Normalize for Notification {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        visit_leaf(self, visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        rewrite_leaf(self, key, patch)
    }
}

/// Unread notification badge count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

impl Normalize for UnreadCount {
    fn visit(&self, _visitor: &mut dyn FnMut(&dyn AnyEntity)) {}

    fn rewrite(&mut self, _key: &EntityKey, _patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        false
    }
}

/// The record a favorite points at, carried inline so a placeholder row can
/// render before the server confirms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FavoriteSubject {
    Project(Project),
    Post(Post),
}

impl FavoriteSubject {
    /// Id of the favorited record.
    pub fn id(&self) -> &str {
        match self {
            Self::Project(project) => &project.id,
            Self::Post(post) => &post.id,
        }
    }

    /// Display name for the favorites sidebar.
    pub fn name(&self) -> &str {
        match self {
            Self::Project(project) => &project.name,
            Self::Post(post) => &post.title,
        }
    }
}

impl Normalize for FavoriteSubject {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        match self {
            Self::Project(project) => project.visit(visitor),
            Self::Post(post) => post.visit(visitor),
        }
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        match self {
            Self::Project(project) => project.rewrite(key, patch),
            Self::Post(post) => post.rewrite(key, patch),
        }
    }
}

/// Ordered favorites-list row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub subject: FavoriteSubject,
    pub created_at: DateTime<Utc>,
}

impl Entity for Favorite {
    const KIND: &'static str = "favorite";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Normalize for Favorite {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        visit_leaf(self, visitor);
        self.subject.visit(visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        let mut hit = rewrite_leaf(self, key, patch);
        hit |= self.subject.rewrite(key, patch);
        hit
    }
}

/// Chat thread summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageThread {
    pub id: String,
    pub title: String,
    pub unread_count: u64,
    pub latest_message_truncated: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Entity for MessageThread {
    const KIND: &'static str = "thread";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Normalize for MessageThread {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        visit_leaf(self, visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        rewrite_leaf(self, key, patch)
    }
}

/// Chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Client id the message was optimistically created under; preserved
    /// across server replacement so in-flight UI state stays keyed.
    pub optimistic_id: Option<String>,
    pub content: String,
    pub sender: Member,
    pub grouped_reactions: Vec<GroupedReaction>,
    pub discarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Message {
    const KIND: &'static str = "message";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Normalize for Message {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        visit_leaf(self, visitor);
        self.sender.visit(visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        let mut hit = rewrite_leaf(self, key, patch);
        hit |= self.sender.rewrite(key, patch);
        hit
    }
}

/// Action recorded on a subject's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineAction {
    SubjectTitleUpdated,
    PostResolved,
    PostUnresolved,
    SubjectPinned,
    SubjectUnpinned,
}

impl TimelineAction {
    /// The action that cancels this one out when rolled up.
    pub fn inverse(self) -> Option<Self> {
        match self {
            Self::SubjectTitleUpdated => None,
            Self::PostResolved => Some(Self::PostUnresolved),
            Self::PostUnresolved => Some(Self::PostResolved),
            Self::SubjectPinned => Some(Self::SubjectUnpinned),
            Self::SubjectUnpinned => Some(Self::SubjectPinned),
        }
    }
}

/// Timeline event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    pub action: TimelineAction,
    pub actor: Member,
    pub from_title: Option<String>,
    pub to_title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for TimelineEvent {
    const KIND: &'static str = "timeline_event";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Normalize for TimelineEvent {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        visit_leaf(self, visitor);
        self.actor.visit(visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        let mut hit = rewrite_leaf(self, key, patch);
        hit |= self.actor.rewrite(key, patch);
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn favorite_payload_round_trips() {
        let json = serde_json::json!({
            "id": "fav-9",
            "subject": {
                "kind": "project",
                "id": "p1",
                "name": "Roadmap",
                "archived": false,
                "private": true,
                "contributors_count": 4,
                "viewer_has_favorited": true,
                "unread_for_viewer": false,
                "last_activity_at": "2021-07-21T17:32:28Z"
            },
            "created_at": "2021-07-21T17:32:28Z"
        });

        let favorite: Favorite = serde_json::from_value(json).unwrap();
        assert_eq!(favorite.id, "fav-9");
        assert_eq!(favorite.subject.id(), "p1");
        assert_eq!(favorite.subject.name(), "Roadmap");

        let back = serde_json::to_value(&favorite).unwrap();
        let again: Favorite = serde_json::from_value(back).unwrap();
        assert_eq!(again, favorite);
    }

    use test_case::test_case;

    #[test_case(TimelineAction::PostResolved => Some(TimelineAction::PostUnresolved))]
    #[test_case(TimelineAction::PostUnresolved => Some(TimelineAction::PostResolved))]
    #[test_case(TimelineAction::SubjectPinned => Some(TimelineAction::SubjectUnpinned))]
    #[test_case(TimelineAction::SubjectUnpinned => Some(TimelineAction::SubjectPinned))]
    #[test_case(TimelineAction::SubjectTitleUpdated => None)]
    fn timeline_inverse(action: TimelineAction) -> Option<TimelineAction> {
        action.inverse()
    }
}
