//! Chat messages: optimistic send, confirm swap, push reconciliation.

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use tidemark_store::{OptimisticEdit, Page, Paginated, QueryKey};

use crate::coordinator::MutationCoordinator;
use crate::pending::mint_client_id;
use crate::records::{Member, Message, MessageThread};
use crate::retry::RetryRegistry;

/// Key of the thread list for one organization.
pub fn threads_key(org: &str) -> QueryKey {
    QueryKey::of(["orgs", org, "threads"])
}

/// Key of one thread's paginated message history.
pub fn messages_key(org: &str, thread_id: &str) -> QueryKey {
    QueryKey::of(["orgs", org, "messages", thread_id])
}

/// Payload held for resending a failed message.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftMessage {
    pub thread_id: String,
    pub content: String,
}

/// In-flight optimistic send.
///
/// Holds the `create-message` scope guard until settled so rapid sends into
/// one client apply in submission order.
pub struct MessageSend {
    pub client_id: String,
    edit: OptimisticEdit,
    _scope: OwnedMutexGuard<()>,
}

/// Optimistically send a message: prepend it to the thread's first page and
/// update the thread preview everywhere the thread appears.
#[tracing::instrument(skip(coordinator, retry, sender, content))]
pub async fn send_message(
    coordinator: &MutationCoordinator,
    retry: &RetryRegistry<DraftMessage>,
    org: &str,
    thread_id: &str,
    content: &str,
    sender: Member,
) -> MessageSend {
    let scope = coordinator.scope("create-message").await;
    let messages = messages_key(org, thread_id);
    coordinator
        .prepare(&[messages.clone(), threads_key(org)])
        .await;

    let client_id = mint_client_id();
    retry.insert(
        client_id.clone(),
        DraftMessage {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
        },
    );

    let now = Utc::now();
    let message = Message {
        id: client_id.clone(),
        optimistic_id: Some(client_id.clone()),
        content: content.to_string(),
        sender,
        grouped_reactions: Vec::new(),
        discarded_at: None,
        created_at: now,
    };
    coordinator.store().update::<Paginated<Message>>(&messages, |history| {
        match history.pages.first_mut() {
            Some(first) => first.items.insert(0, message.clone()),
            None => history.pages.push(Page::new(vec![message.clone()], None)),
        }
    });

    // Match the server's preview formatting to avoid a flicker once the
    // response lands.
    let preview = format!("You: {content}");
    let edit = coordinator.begin::<MessageThread>(thread_id, |thread| {
        thread.latest_message_truncated = Some(preview.clone());
        thread.last_message_at = Some(now);
    });
    MessageSend {
        client_id,
        edit,
        _scope: scope,
    }
}

/// Apply the server-confirmed message.
///
/// Replaces the optimistic row in place, keeping the optimistic id so
/// animation keys stay stable, commits the authoritative thread, and bumps
/// the thread to the top of the list.
pub fn confirm_message(
    coordinator: &MutationCoordinator,
    retry: &RetryRegistry<DraftMessage>,
    org: &str,
    send: MessageSend,
    server_message: Message,
    server_thread: MessageThread,
) {
    let MessageSend {
        client_id, _scope, ..
    } = send;
    retry.remove(&client_id);

    let thread_id = server_thread.id.clone();
    coordinator.store().update::<Paginated<Message>>(
        &messages_key(org, &thread_id),
        |history| {
            for page in &mut history.pages {
                for item in &mut page.items {
                    if item.id == client_id {
                        let mut replacement = server_message.clone();
                        replacement.optimistic_id = Some(client_id.clone());
                        *item = replacement;
                    }
                }
            }
        },
    );
    coordinator.commit(server_thread);

    coordinator.store().update::<Vec<MessageThread>>(&threads_key(org), |threads| {
        if let Some(position) = threads.iter().position(|thread| thread.id == thread_id) {
            let thread = threads.remove(position);
            threads.insert(0, thread);
        }
    });
}

/// Mark a failed send for retry.
///
/// The optimistic row stays on screen with its retry affordance; only the
/// thread preview edit is rolled back.
pub fn fail_message(
    coordinator: &MutationCoordinator,
    retry: &RetryRegistry<DraftMessage>,
    send: MessageSend,
) {
    let MessageSend {
        client_id,
        edit,
        _scope,
    } = send;
    debug!(%client_id, "message send failed, held for retry");
    retry.mark_failed(&client_id);
    coordinator.rollback(edit);
}

/// Re-issue a failed send: marks it in flight again and hands back the
/// original payload for the network call.
pub fn retry_message(
    retry: &RetryRegistry<DraftMessage>,
    client_id: &str,
) -> Option<DraftMessage> {
    if !retry.mark_pending(client_id) {
        return None;
    }
    retry.get(client_id).map(|state| state.payload)
}

/// Reconcile a server-pushed message.
///
/// A known copy is replaced in place (preserving its optimistic id); an
/// unknown message is prepended. Discarded rows are dropped, and the pushed
/// thread summary is committed so previews and unread counts fan out.
pub fn apply_incoming(
    coordinator: &MutationCoordinator,
    org: &str,
    message: Message,
    thread: MessageThread,
) {
    let key = messages_key(org, &thread.id);
    coordinator.store().update::<Paginated<Message>>(&key, |history| {
        let mut known = false;
        for page in &mut history.pages {
            for item in &mut page.items {
                if item.id == message.id || item.optimistic_id == Some(message.id.clone()) {
                    let optimistic_id = item.optimistic_id.clone();
                    let mut replacement = message.clone();
                    replacement.optimistic_id = optimistic_id;
                    *item = replacement;
                    known = true;
                }
            }
        }
        if !known {
            match history.pages.first_mut() {
                Some(first) => first.items.insert(0, message.clone()),
                None => history.pages.push(Page::new(vec![message.clone()], None)),
            }
        }
        for page in &mut history.pages {
            page.items.retain(|item| item.discarded_at.is_none());
        }
    });
    coordinator.commit(thread);
}
