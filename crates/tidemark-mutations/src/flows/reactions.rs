//! Reactions: optimistic grouped-reaction edits with pending-id sequencing.
//!
//! The tricky case is react-then-unreact faster than the network: the
//! remove must not fire against the temporary id, so it waits on the
//! pending registry for the server id the add eventually gets.

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use tidemark_store::{OptimisticEdit, QueryKey};

use crate::coordinator::MutationCoordinator;
use crate::error::MutationError;
use crate::pending::{PendingMutations, mint_client_id};
use crate::records::{GroupedReaction, Post};

/// Key of one post's detail query.
pub fn post_key(org: &str, post_id: &str) -> QueryKey {
    QueryKey::of(["orgs", org, "posts", post_id])
}

fn reaction_scope(post_id: &str) -> String {
    format!("reactions:{post_id}")
}

/// In-flight optimistic reaction add.
///
/// Holds the scope guard until confirmed or failed so a rapid follow-up
/// reaction mutation on the same post serializes behind this one.
pub struct ReactionAdd {
    pub client_id: String,
    edit: OptimisticEdit,
    _scope: OwnedMutexGuard<()>,
}

/// Optimistically add a reaction to a post.
///
/// Bumps (or creates) the emoji bucket on every cached copy of the post and
/// records the viewer's reaction under a client id.
#[tracing::instrument(skip(coordinator, pending))]
pub async fn add_reaction(
    coordinator: &MutationCoordinator,
    pending: &PendingMutations,
    org: &str,
    post_id: &str,
    emoji: &str,
) -> ReactionAdd {
    let scope = coordinator.scope(&reaction_scope(post_id)).await;
    let key = post_key(org, post_id);
    coordinator.prepare(std::slice::from_ref(&key)).await;

    let client_id = mint_client_id();
    pending.create(client_id.clone());

    let edit = coordinator.begin::<Post>(post_id, |post| {
        match post
            .grouped_reactions
            .iter_mut()
            .find(|bucket| bucket.emoji == emoji)
        {
            Some(bucket) => {
                bucket.reactions_count += 1;
                bucket.viewer_reaction_id = Some(client_id.clone());
            }
            None => post.grouped_reactions.push(GroupedReaction {
                emoji: emoji.to_string(),
                reactions_count: 1,
                viewer_reaction_id: Some(client_id.clone()),
            }),
        }
    });
    ReactionAdd {
        client_id,
        edit,
        _scope: scope,
    }
}

/// Rewrite the viewer's reaction id to the server-assigned one and resolve
/// the pending id for any dependent remove.
pub fn confirm_reaction(
    coordinator: &MutationCoordinator,
    pending: &PendingMutations,
    post_id: &str,
    add: ReactionAdd,
    server_id: &str,
) {
    let client_id = add.client_id.clone();
    coordinator.commit_with::<Post>(post_id, |post| {
        for bucket in &mut post.grouped_reactions {
            if bucket.viewer_reaction_id.as_deref() == Some(client_id.as_str()) {
                bucket.viewer_reaction_id = Some(server_id.to_string());
            }
        }
    });
    pending.resolve(&add.client_id, server_id);
}

/// Roll a failed reaction back and reject awaiting dependents.
pub fn fail_reaction(
    coordinator: &MutationCoordinator,
    pending: &PendingMutations,
    add: ReactionAdd,
    error: MutationError,
) {
    let ReactionAdd {
        client_id,
        edit,
        _scope,
    } = add;
    debug!(%client_id, %error, "reaction create failed, rolling back");
    coordinator.rollback(edit);
    pending.reject(&client_id, error);
}

/// Resolve the reaction id a delete should target, waiting out an
/// unconfirmed add when handed a client id.
pub async fn resolve_reaction_id(
    pending: &PendingMutations,
    id: &str,
) -> Result<String, MutationError> {
    if pending.contains(id) {
        pending.wait(id).await
    } else {
        Ok(id.to_string())
    }
}

/// In-flight optimistic reaction removal.
pub struct ReactionRemoval {
    /// Server-side id the delete call must target.
    pub reaction_id: String,
    edit: OptimisticEdit,
    _scope: OwnedMutexGuard<()>,
}

/// Optimistically remove the viewer's reaction from a post.
///
/// When handed the client id of a still-pending add, waits for the server
/// id first; a rejected add propagates the error and no local edit is
/// applied, since there is no server record to delete.
#[tracing::instrument(skip(coordinator, pending))]
pub async fn remove_reaction(
    coordinator: &MutationCoordinator,
    pending: &PendingMutations,
    org: &str,
    post_id: &str,
    reaction_id: &str,
) -> Result<ReactionRemoval, MutationError> {
    let scope = coordinator.scope(&reaction_scope(post_id)).await;
    let key = post_key(org, post_id);
    coordinator.prepare(std::slice::from_ref(&key)).await;

    let reaction_id = resolve_reaction_id(pending, reaction_id).await?;

    let edit = coordinator.begin::<Post>(post_id, |post| {
        post.grouped_reactions.retain_mut(|bucket| {
            if bucket.viewer_reaction_id.as_deref() != Some(reaction_id.as_str()) {
                return true;
            }
            bucket.viewer_reaction_id = None;
            bucket.reactions_count = bucket.reactions_count.saturating_sub(1);
            bucket.reactions_count > 0
        });
    });
    Ok(ReactionRemoval {
        reaction_id,
        edit,
        _scope: scope,
    })
}

/// Roll a failed reaction removal back.
pub fn fail_remove_reaction(coordinator: &MutationCoordinator, removal: ReactionRemoval) {
    let ReactionRemoval {
        reaction_id, edit, ..
    } = removal;
    debug!(%reaction_id, "reaction delete failed, rolling back");
    coordinator.rollback(edit);
}
