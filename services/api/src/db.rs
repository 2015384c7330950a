//! Data Access Layer
//!
//! This module contains all the functions for interacting with the PostgreSQL
//! database. Queries are bound at runtime so the crate builds without a live
//! database; the schema lives in `migrations/`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use coursecraft_core::course::{CourseId, CourseRecord, CourseStore};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::CourseRow;

const COURSE_COLUMNS: &str =
    "id, user_id, topic, outline_html, total_lessons, completed_lessons, created_at";

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn create_course(
        &self,
        user_id: &str,
        topic: &str,
        outline_html: &str,
        total_lessons: usize,
    ) -> Result<CourseRow> {
        let total_lessons =
            i32::try_from(total_lessons).context("Lesson count does not fit in the schema")?;
        let query = format!(
            "INSERT INTO courses (user_id, topic, outline_html, total_lessons) \
             VALUES ($1, $2, $3, $4) RETURNING {COURSE_COLUMNS}"
        );
        let course = sqlx::query_as::<_, CourseRow>(&query)
            .bind(user_id)
            .bind(topic)
            .bind(outline_html)
            .bind(total_lessons)
            .fetch_one(&self.pool)
            .await?;
        Ok(course)
    }

    /// Retrieves a single course by its ID, scoped to a specific user.
    pub async fn get_course(&self, course_id: Uuid, user_id: &str) -> Result<Option<CourseRow>> {
        let query = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1 AND user_id = $2");
        let course = sqlx::query_as::<_, CourseRow>(&query)
            .bind(course_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(course)
    }

    /// Lists all courses for a given user, ordered by most recent.
    pub async fn list_courses(&self, user_id: &str) -> Result<Vec<CourseRow>> {
        let query = format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let courses = sqlx::query_as::<_, CourseRow>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(courses)
    }

    /// Replaces the completed-lesson list of a course. Returns `false` if the
    /// course does not exist for this user.
    pub async fn update_progress(
        &self,
        course_id: Uuid,
        user_id: &str,
        completed_lessons: &[String],
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE courses SET completed_lessons = $1, updated_at = now() \
             WHERE id = $2 AND user_id = $3",
        )
        .bind(completed_lessons)
        .bind(course_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// The course store seen by one user's session.
#[derive(Clone)]
pub struct UserCourses {
    db: Arc<Db>,
    user_id: String,
}

impl UserCourses {
    pub fn new(db: Arc<Db>, user_id: impl Into<String>) -> Self {
        Self {
            db,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl CourseStore for UserCourses {
    async fn create_course(
        &self,
        topic: &str,
        outline_html: &str,
        total_lessons: usize,
    ) -> Result<CourseId> {
        let row = self
            .db
            .create_course(&self.user_id, topic, outline_html, total_lessons)
            .await?;
        Ok(row.id.to_string())
    }

    async fn update_progress(&self, id: &str, completed_lessons: &[String]) -> Result<()> {
        let course_id = parse_course_id(id)?;
        let updated = self
            .db
            .update_progress(course_id, &self.user_id, completed_lessons)
            .await?;
        anyhow::ensure!(updated, "Course '{}' not found", id);
        Ok(())
    }

    async fn list_courses(&self) -> Result<Vec<CourseRecord>> {
        let rows = self.db.list_courses(&self.user_id).await?;
        Ok(rows.into_iter().map(CourseRecord::from).collect())
    }

    async fn get_course(&self, id: &str) -> Result<Option<CourseRecord>> {
        // An id that is not a UUID cannot name a stored course.
        let Ok(course_id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let row = self.db.get_course(course_id, &self.user_id).await?;
        Ok(row.map(CourseRecord::from))
    }
}

fn parse_course_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("'{}' is not a valid course id", id))
}
