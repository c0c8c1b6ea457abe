//! Favorites: placeholder insert, confirm swap, delete with restore.

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use tidemark_store::{CacheStore, OptimisticEdit, QueryKey};

use crate::coordinator::MutationCoordinator;
use crate::error::MutationError;
use crate::lists::{self, ListRemoval};
use crate::pending::{PendingMutations, mint_client_id};
use crate::records::{Favorite, FavoriteSubject, Post, Project};

/// Key of the ordered favorites list for one organization.
pub fn favorites_key(org: &str) -> QueryKey {
    QueryKey::of(["favorites", org])
}

fn favorites_scope(org: &str) -> String {
    format!("favorites:{org}")
}

/// In-flight optimistic favorite: the placeholder's client id plus the
/// rollback record for the subject's `viewer_has_favorited` fan-out.
///
/// Holds the per-organization favorites scope guard until settled, so a
/// rapid favorite-then-unfavorite applies in submission order instead of
/// losing the second update.
pub struct FavoriteAdd {
    pub client_id: String,
    edit: OptimisticEdit,
    _scope: OwnedMutexGuard<()>,
}

/// Optimistically favorite a subject.
///
/// Prepends a placeholder row under a client id and flips
/// `viewer_has_favorited` on every cached copy of the subject, including
/// the one inside the placeholder itself.
#[tracing::instrument(skip(coordinator, pending, subject), fields(subject_id = subject.id()))]
pub async fn add_favorite(
    coordinator: &MutationCoordinator,
    pending: &PendingMutations,
    org: &str,
    subject: FavoriteSubject,
) -> FavoriteAdd {
    let scope = coordinator.scope(&favorites_scope(org)).await;
    let key = favorites_key(org);
    coordinator.prepare(std::slice::from_ref(&key)).await;

    let client_id = mint_client_id();
    pending.create(client_id.clone());

    let placeholder = Favorite {
        id: client_id.clone(),
        subject: subject.clone(),
        created_at: Utc::now(),
    };
    lists::insert_placeholder::<Vec<Favorite>, _>(coordinator.store(), &key, placeholder);

    let edit = match &subject {
        FavoriteSubject::Project(project) => {
            coordinator.begin::<Project>(&project.id, |p| p.viewer_has_favorited = true)
        }
        FavoriteSubject::Post(post) => {
            coordinator.begin::<Post>(&post.id, |p| p.viewer_has_favorited = true)
        }
    };
    FavoriteAdd {
        client_id,
        edit,
        _scope: scope,
    }
}

/// Apply the server-confirmed favorite.
///
/// Swaps the placeholder in place (so no temporary id stays reachable),
/// commits the authoritative subject, and resolves the pending id for any
/// dependent action.
pub fn confirm_favorite(
    coordinator: &MutationCoordinator,
    pending: &PendingMutations,
    org: &str,
    add: FavoriteAdd,
    server: Favorite,
) {
    let FavoriteAdd {
        client_id, _scope, ..
    } = add;
    lists::replace_placeholder::<Vec<Favorite>, _>(
        coordinator.store(),
        &favorites_key(org),
        &client_id,
        server.clone(),
    );
    match server.subject {
        FavoriteSubject::Project(project) => coordinator.commit(project),
        FavoriteSubject::Post(post) => coordinator.commit(post),
    }
    pending.resolve(&client_id, server.id.clone());
}

/// Roll a failed favorite back: restore the subject's flag everywhere,
/// drop the placeholder row, and reject the pending id.
pub fn fail_favorite(
    coordinator: &MutationCoordinator,
    pending: &PendingMutations,
    org: &str,
    add: FavoriteAdd,
    error: MutationError,
) {
    let FavoriteAdd {
        client_id,
        edit,
        _scope,
    } = add;
    debug!(%client_id, %error, "favorite create failed, rolling back");
    coordinator.rollback(edit);
    let _ = lists::remove_item::<Vec<Favorite>, Favorite>(
        coordinator.store(),
        &favorites_key(org),
        &client_id,
    );
    pending.reject(&client_id, error);
}

/// In-flight optimistic unfavorite: the captured row for reinsertion plus
/// the rollback record for the subject's flag.
pub struct FavoriteRemoval {
    removal: ListRemoval<Vec<Favorite>, Favorite>,
    edit: OptimisticEdit,
    _scope: OwnedMutexGuard<()>,
}

impl FavoriteRemoval {
    /// The favorite being removed.
    pub fn favorite(&self) -> &Favorite {
        self.removal.item()
    }
}

/// Optimistically remove a favorite by id.
///
/// Returns `None` when the row is not cached (already removed elsewhere).
#[tracing::instrument(skip(coordinator))]
pub async fn remove_favorite(
    coordinator: &MutationCoordinator,
    org: &str,
    favorite_id: &str,
) -> Option<FavoriteRemoval> {
    let scope = coordinator.scope(&favorites_scope(org)).await;
    let key = favorites_key(org);
    coordinator.prepare(std::slice::from_ref(&key)).await;

    let removal =
        lists::remove_item::<Vec<Favorite>, Favorite>(coordinator.store(), &key, favorite_id)?;
    let edit = match &removal.item().subject {
        FavoriteSubject::Project(project) => {
            coordinator.begin::<Project>(&project.id, |p| p.viewer_has_favorited = false)
        }
        FavoriteSubject::Post(post) => {
            coordinator.begin::<Post>(&post.id, |p| p.viewer_has_favorited = false)
        }
    };
    Some(FavoriteRemoval {
        removal,
        edit,
        _scope: scope,
    })
}

/// Undo a failed delete: reinsert the row at its original index and restore
/// the subject's flag.
pub fn fail_remove_favorite(coordinator: &MutationCoordinator, removal: FavoriteRemoval) {
    let FavoriteRemoval {
        removal,
        edit,
        _scope,
    } = removal;
    debug!(favorite_id = %removal.item().id, "favorite delete failed, restoring");
    removal.restore(coordinator.store());
    coordinator.rollback(edit);
}

/// Rewrite the subject embedded in any favorites row after a server push.
///
/// Keeps the sidebar consistent when e.g. a thread summary changes while
/// its favorite row is on screen.
pub fn refresh_favorited_subject(store: &CacheStore, subject: FavoriteSubject) {
    match subject {
        FavoriteSubject::Project(project) => store.commit_entity(project),
        FavoriteSubject::Post(post) => store.commit_entity(post),
    }
}
