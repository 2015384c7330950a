//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the course backend and service clients.

use crate::db::{Db, UserCourses};
use coursecraft_core::{
    course::{CourseStore, InMemoryCourseStore},
    export::DocumentExporter,
    llm_client::LLMClient,
    preferences::PreferenceStore,
    prompts::PromptSet,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Where courses are persisted.
pub enum CourseBackend {
    Postgres(Arc<Db>),
    /// Offline mode: one process-local store per user id.
    InMemory(Mutex<HashMap<String, Arc<InMemoryCourseStore>>>),
}

impl CourseBackend {
    pub fn in_memory() -> Self {
        Self::InMemory(Mutex::new(HashMap::new()))
    }

    /// The course store scoped to `user_id`.
    pub fn for_user(&self, user_id: &str) -> Arc<dyn CourseStore> {
        match self {
            CourseBackend::Postgres(db) => Arc::new(UserCourses::new(db.clone(), user_id)),
            CourseBackend::InMemory(stores) => {
                let mut stores = stores.lock().unwrap_or_else(PoisonError::into_inner);
                stores.entry(user_id.to_string()).or_default().clone()
            }
        }
    }
}

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
pub struct AppState {
    pub courses: CourseBackend,
    pub llm_client: Arc<dyn LLMClient>,
    pub prompts: Arc<PromptSet>,
    pub preferences: PreferenceStore,
    pub exporter: Arc<dyn DocumentExporter>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_backend_scopes_courses_per_user() {
        let backend = CourseBackend::in_memory();

        let alice = backend.for_user("alice");
        alice.create_course("Rust", "<ul></ul>", 1).await.unwrap();

        assert_eq!(backend.for_user("alice").list_courses().await.unwrap().len(), 1);
        assert!(backend.for_user("bob").list_courses().await.unwrap().is_empty());
    }
}
