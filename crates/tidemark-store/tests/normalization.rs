//! Normalization semantics across query shapes.
//!
//! These cases mirror the behavior feature code depends on: canonical
//! snapshots extracted from whatever shape a query result has, and fan-out
//! writes reaching every embedded copy in the same synchronous pass.

mod common;

use pretty_assertions::assert_eq;

use common::{Project, ProjectDashboard, init_tracing, sample_project};
use tidemark_store::{CacheStore, QueryKey};

#[test]
fn stores_query_data_in_the_normalized_cache() {
    init_tracing();
    let store = CacheStore::new();

    store.populate(QueryKey::of(["foo-bar"]), sample_project("proj-123"));
    assert_eq!(
        store.entity::<Project>("proj-123"),
        Some(sample_project("proj-123"))
    );

    // A later query result for the same entity refreshes the canonical
    // snapshot.
    let mut newer = sample_project("proj-123");
    newer.name = "Project Red".to_string();
    newer.contributors_count = 4;
    store.populate(QueryKey::of(["cat-dog"]), newer.clone());

    assert_eq!(store.entity::<Project>("proj-123"), Some(newer));
}

#[test]
fn updates_normalized_models_with_a_reducer() {
    let store = CacheStore::new();
    store.populate(QueryKey::of(["foo-bar"]), sample_project("proj-123"));

    store.set_entity::<Project>("proj-123", |project| {
        project.name = "Project Beta".to_string();
        project.contributors_count += 1;
    });

    let result = store.entity::<Project>("proj-123").unwrap();
    assert_eq!(result.name, "Project Beta");
    assert_eq!(result.contributors_count, 6);
    // Untouched fields survive the merge.
    assert_eq!(result.cover_photo_url, "https://example.com/photo.jpg");
}

#[test]
fn sets_normalized_models_across_queries_and_shapes() {
    let store = CacheStore::new();
    let id = "proj-123";

    store.populate(QueryKey::of(["single"]), sample_project(id));
    store.populate(
        QueryKey::of(["array"]),
        vec![sample_project(id), sample_project("proj-456")],
    );
    store.populate(
        QueryKey::of(["nested-object"]),
        ProjectDashboard {
            label: "bar".to_string(),
            project: sample_project(id),
            projects: vec![sample_project(id), sample_project("proj-456")],
        },
    );

    assert_eq!(store.entity::<Project>(id), Some(sample_project(id)));

    store.set_entity::<Project>(id, |project| {
        project.name = "Project Beta".to_string();
        project.contributors_count += 1;
    });

    let normalized = store.entity::<Project>(id).unwrap();
    assert_eq!(normalized.name, "Project Beta");
    assert_eq!(normalized.contributors_count, 6);

    let single: Project = store.get(&QueryKey::of(["single"])).unwrap();
    assert_eq!(single.name, "Project Beta");
    assert_eq!(single.cover_photo_url, "https://example.com/photo.jpg");

    let array: Vec<Project> = store.get(&QueryKey::of(["array"])).unwrap();
    assert_eq!(array[0].name, "Project Beta");
    assert_eq!(array[0].contributors_count, 6);
    // The sibling entity is untouched.
    assert_eq!(array[1].name, "Project Alpha");

    let nested: ProjectDashboard = store.get(&QueryKey::of(["nested-object"])).unwrap();
    assert_eq!(nested.project.name, "Project Beta");
    assert_eq!(nested.projects[0].name, "Project Beta");
    assert_eq!(nested.projects[0].contributors_count, 6);
    assert_eq!(nested.projects[1].name, "Project Alpha");
    assert_eq!(nested.label, "bar");
}

#[test]
fn optimistic_edit_captures_exact_rollback_state() {
    let store = CacheStore::new();
    let id = "proj-123";

    store.populate(QueryKey::of(["single"]), sample_project(id));
    store.populate(
        QueryKey::of(["array"]),
        vec![sample_project(id), sample_project("proj-456")],
    );

    let before_single: Project = store.get(&QueryKey::of(["single"])).unwrap();
    let before_array: Vec<Project> = store.get(&QueryKey::of(["array"])).unwrap();
    let before_entity = store.entity::<Project>(id).unwrap();

    let edit = store.set_entity::<Project>(id, |project| {
        project.name = "Project Beta".to_string();
        project.archived = true;
        project.contributors_count += 1;
    });
    assert_eq!(edit.touched_keys().len(), 2);
    assert!(!edit.is_empty());

    // The speculative value is visible everywhere.
    assert_eq!(
        store.get::<Project>(&QueryKey::of(["single"])).unwrap().name,
        "Project Beta"
    );

    store.rollback(edit);

    // Bit-for-bit restoration of every touched view and the canonical.
    assert_eq!(
        store.get::<Project>(&QueryKey::of(["single"])).unwrap(),
        before_single
    );
    assert_eq!(
        store.get::<Vec<Project>>(&QueryKey::of(["array"])).unwrap(),
        before_array
    );
    assert_eq!(store.entity::<Project>(id).unwrap(), before_entity);
}

#[test]
fn reordering_a_list_refreshes_the_canonical() {
    let store = CacheStore::new();
    let id = "proj-123";
    let key = QueryKey::of(["array"]);

    store.populate(
        key.clone(),
        vec![sample_project(id), sample_project("proj-456")],
    );

    let mut updated = sample_project(id);
    updated.name = "Project Beta".to_string();
    updated.contributors_count = 9;
    store.populate(key.clone(), vec![sample_project("proj-456"), updated]);

    let normalized = store.entity::<Project>(id).unwrap();
    assert_eq!(normalized.name, "Project Beta");
    assert_eq!(normalized.contributors_count, 9);

    let array: Vec<Project> = store.get(&key).unwrap();
    assert_eq!(array[0].id, "proj-456");
    assert_eq!(array[1].name, "Project Beta");
}

#[test]
fn commit_supersedes_a_pending_optimistic_value() {
    let store = CacheStore::new();
    let id = "proj-123";
    store.populate(QueryKey::of(["single"]), sample_project(id));

    let edit = store.set_entity::<Project>(id, |project| {
        project.name = "Speculative".to_string();
    });

    let mut server = sample_project(id);
    server.name = "Authoritative".to_string();
    store.commit_entity(server.clone());

    // Server payload wins over the speculative value, and a stray rollback
    // afterwards restores pre-edit bytes by contract.
    assert_eq!(store.entity::<Project>(id), Some(server));
    store.rollback(edit);
    assert_eq!(store.entity::<Project>(id), Some(sample_project(id)));
}

#[test]
fn fan_out_reaches_every_embedding_query_immediately() {
    let store = CacheStore::new();
    let id = "proj-123";

    let keys: Vec<QueryKey> = (0..8)
        .map(|n| QueryKey::of(["view"]).push(n as u64))
        .collect();
    for key in &keys {
        store.populate(key.clone(), vec![sample_project(id)]);
    }

    let edit = store.set_entity::<Project>(id, |project| project.archived = true);
    assert_eq!(edit.touched_keys().len(), keys.len());

    for key in &keys {
        let list: Vec<Project> = store.get(key).unwrap();
        assert!(list[0].archived, "view {key} missed the fan-out");
    }
}
