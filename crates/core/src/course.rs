//! Course persistence interface.
//!
//! The session controller only depends on [`CourseStore`]. The API service
//! provides a Postgres implementation scoped to one user; the in-memory store
//! below backs offline mode and tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Opaque identifier assigned by the store.
pub type CourseId = String;

/// A persisted course outline and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: CourseId,
    pub topic: String,
    pub outline_html: String,
    pub total_lessons: usize,
    pub completed_lessons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl CourseRecord {
    /// Completion percentage; zero when the outline has no lessons.
    pub fn progress_percent(&self) -> f64 {
        if self.total_lessons == 0 {
            return 0.0;
        }
        self.completed_lessons.len() as f64 / self.total_lessons as f64 * 100.0
    }
}

/// Storage contract for generated courses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn create_course(
        &self,
        topic: &str,
        outline_html: &str,
        total_lessons: usize,
    ) -> Result<CourseId>;

    async fn update_progress(&self, id: &str, completed_lessons: &[String]) -> Result<()>;

    /// All courses, most recently created first.
    async fn list_courses(&self) -> Result<Vec<CourseRecord>>;

    async fn get_course(&self, id: &str) -> Result<Option<CourseRecord>>;
}

/// Process-local store used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryCourseStore {
    courses: Mutex<Vec<CourseRecord>>,
}

impl InMemoryCourseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CourseStore for InMemoryCourseStore {
    async fn create_course(
        &self,
        topic: &str,
        outline_html: &str,
        total_lessons: usize,
    ) -> Result<CourseId> {
        let record = CourseRecord {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            outline_html: outline_html.to_string(),
            total_lessons,
            completed_lessons: Vec::new(),
            created_at: Utc::now(),
        };
        let id = record.id.clone();
        self.courses.lock().await.push(record);
        Ok(id)
    }

    async fn update_progress(&self, id: &str, completed_lessons: &[String]) -> Result<()> {
        let mut courses = self.courses.lock().await;
        let course = courses
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("Course '{}' not found", id))?;
        course.completed_lessons = completed_lessons.to_vec();
        Ok(())
    }

    async fn list_courses(&self) -> Result<Vec<CourseRecord>> {
        let courses = self.courses.lock().await;
        // Insertion order breaks ties between equal timestamps.
        Ok(courses.iter().rev().cloned().collect())
    }

    async fn get_course(&self, id: &str) -> Result<Option<CourseRecord>> {
        let courses = self.courses.lock().await;
        Ok(courses.iter().find(|c| c.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_round_trip_and_ordering() {
        let store = InMemoryCourseStore::new();
        let first = store.create_course("Rust", "<ul></ul>", 3).await.unwrap();
        let second = store.create_course("Go", "<ul></ul>", 0).await.unwrap();

        let listed = store.list_courses().await.unwrap();
        assert_eq!(
            listed.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
            vec![second.clone(), first.clone()]
        );

        store
            .update_progress(&first, &["Ownership".to_string()])
            .await
            .unwrap();
        let course = store.get_course(&first).await.unwrap().unwrap();
        assert_eq!(course.completed_lessons, vec!["Ownership"]);
        assert_eq!(course.total_lessons, 3);
        assert!(store.get_course("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_progress_unknown_course_fails() {
        let store = InMemoryCourseStore::new();
        assert!(store.update_progress("nope", &[]).await.is_err());
    }

    #[test]
    fn test_progress_percent() {
        let mut record = CourseRecord {
            id: "1".into(),
            topic: "Rust".into(),
            outline_html: String::new(),
            total_lessons: 4,
            completed_lessons: vec!["a".into()],
            created_at: Utc::now(),
        };
        assert_eq!(record.progress_percent(), 25.0);
        record.total_lessons = 0;
        assert_eq!(record.progress_percent(), 0.0);
    }
}
