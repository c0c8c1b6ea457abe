//! Shared fixtures for store integration tests.

use std::any::Any;
use std::sync::Once;

use tidemark_store::normalize::{rewrite_leaf, visit_leaf};
use tidemark_store::{AnyEntity, Entity, EntityKey, Normalize};

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness once per binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Sample record mirroring a project payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub contributors_count: u64,
    pub cover_photo_url: String,
    pub archived: bool,
    pub viewer_has_favorited: bool,
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

pub fn sample_project(id: &str) -> Project {
    Project {
        id: id.to_string(),
        name: "Project Alpha".to_string(),
        description: "This is a sample project description.".to_string(),
        contributors_count: 5,
        cover_photo_url: "https://example.com/photo.jpg".to_string(),
        archived: false,
        viewer_has_favorited: false,
    }
}

/// Nested response shape: a project embedded next to unrelated fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectDashboard {
    pub label: String,
    pub project: Project,
    pub projects: Vec<Project>,
}

impl Normalize for ProjectDashboard {
    fn visit(&self, visitor: &mut dyn FnMut(&dyn AnyEntity)) {
        self.project.visit(visitor);
        self.projects.visit(visitor);
    }

    fn rewrite(&mut self, key: &EntityKey, patch: &mut dyn FnMut(&mut dyn Any)) -> bool {
        let mut hit = self.project.rewrite(key, patch);
        hit |= self.projects.rewrite(key, patch);
        hit
    }
}
