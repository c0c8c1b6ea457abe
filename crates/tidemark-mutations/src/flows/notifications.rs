//! Notifications: family-wide read-state rewrites.

use tracing::debug;

use tidemark_store::{CacheStore, OptimisticEdit, QueryKey};

use crate::coordinator::MutationCoordinator;
use crate::records::{Notification, UnreadCount};

/// Prefix addressing every notifications query for one organization,
/// whatever filter it was fetched with.
pub fn notifications_prefix(org: &str) -> QueryKey {
    QueryKey::of(["notifications", org])
}

/// Key of one filtered notifications query.
pub fn notifications_key(org: &str, filter: &str) -> QueryKey {
    notifications_prefix(org).push(filter)
}

/// Key of the unread badge count.
pub fn unread_count_key(org: &str) -> QueryKey {
    notifications_prefix(org).push("unread-count")
}

/// Mark every cached notification read and zero the unread badge, across
/// all filter queries, in one synchronous pass.
///
/// Returns the number of notification queries rewritten.
#[tracing::instrument(skip(store))]
pub async fn mark_all_read(store: &CacheStore, org: &str) -> usize {
    let prefix = notifications_prefix(org);
    store.cancel(&prefix).await;

    let touched = store.update_paginated::<Notification>(&prefix, |page| {
        for notification in &mut page.items {
            notification.read = true;
        }
    });
    store.update::<UnreadCount>(&unread_count_key(org), |badge| badge.count = 0);
    debug!(org, queries = touched, "all notifications marked read");
    touched
}

/// Failure path for [`mark_all_read`].
///
/// A family-wide rewrite has no exact inverse, so the whole family is
/// invalidated and owners refetch; a brief loading flicker is traded for
/// correctness.
pub fn mark_all_read_failed(store: &CacheStore, org: &str) -> usize {
    store.invalidate(&notifications_prefix(org))
}

/// Toggle one notification's read flag through the normalizer.
pub fn set_notification_read(
    coordinator: &MutationCoordinator,
    id: &str,
    read: bool,
) -> OptimisticEdit {
    coordinator.begin::<Notification>(id, |notification| notification.read = read)
}
