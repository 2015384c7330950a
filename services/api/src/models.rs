//! API and Database Models
//!
//! This module defines the data structures used for database mapping with
//! `sqlx` and for generating OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use coursecraft_core::course::CourseRecord;
use coursecraft_core::preferences::Theme;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A row of the `courses` table.
#[derive(FromRow, Debug, Clone)]
pub struct CourseRow {
    pub id: Uuid,
    pub user_id: String,
    pub topic: String,
    pub outline_html: String,
    pub total_lessons: i32,
    pub completed_lessons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CourseRow> for CourseRecord {
    fn from(row: CourseRow) -> Self {
        Self {
            id: row.id.to_string(),
            topic: row.topic,
            outline_html: row.outline_html,
            total_lessons: usize::try_from(row.total_lessons).unwrap_or(0),
            completed_lessons: row.completed_lessons,
            created_at: row.created_at,
        }
    }
}

/// One entry of the course history list.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CourseSummary {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "Quantum Mechanics")]
    pub topic: String,
    pub total_lessons: usize,
    pub completed_lessons: usize,
    #[schema(example = 50.0)]
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&CourseRecord> for CourseSummary {
    fn from(record: &CourseRecord) -> Self {
        Self {
            id: record.id.clone(),
            topic: record.topic.clone(),
            total_lessons: record.total_lessons,
            completed_lessons: record.completed_lessons.len(),
            progress_percent: record.progress_percent(),
            created_at: record.created_at,
        }
    }
}

/// A saved course with its rendered outline.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CourseDetail {
    pub id: String,
    pub topic: String,
    /// Outline markup, ready to be placed into the outline region.
    pub outline_html: String,
    pub total_lessons: usize,
    pub completed_lessons: Vec<String>,
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
}

impl From<CourseRecord> for CourseDetail {
    fn from(record: CourseRecord) -> Self {
        let progress_percent = record.progress_percent();
        Self {
            id: record.id,
            topic: record.topic,
            outline_html: record.outline_html,
            total_lessons: record.total_lessons,
            completed_lessons: record.completed_lessons,
            progress_percent,
            created_at: record.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct UpdateProgressPayload {
    #[schema(example = json!(["Introduction", "Core Concepts"]))]
    pub completed_lessons: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct ThemeResponse {
    #[schema(value_type = String, example = "dark")]
    pub theme: Theme,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
