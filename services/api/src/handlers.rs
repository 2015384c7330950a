//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for course
//! history, progress and the theme preference. It uses `utoipa` doc comments
//! to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    models::{CourseDetail, CourseSummary, ErrorResponse, ThemeResponse, UpdateProgressPayload},
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

/// List all saved courses for a user, most recent first.
#[utoipa::path(
    get,
    path = "/courses",
    responses(
        (status = 200, description = "Course history", body = [CourseSummary]),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<CourseSummary>>, ApiError> {
    let user_id = user_id(&headers)?;
    let courses = state.courses.for_user(user_id).list_courses().await?;
    Ok(Json(courses.iter().map(CourseSummary::from).collect()))
}

/// Get a saved course with its outline.
#[utoipa::path(
    get,
    path = "/courses/{id}",
    responses(
        (status = 200, description = "Course details", body = CourseDetail),
        (status = 404, description = "Course not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Course ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_course(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;

    let course = state
        .courses
        .for_user(user_id)
        .get_course(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Course with id '{}' not found", id)))?;

    Ok((StatusCode::OK, Json(CourseDetail::from(course))))
}

/// Replace the completed lessons of a saved course.
#[utoipa::path(
    put,
    path = "/courses/{id}/progress",
    request_body = UpdateProgressPayload,
    responses(
        (status = 200, description = "Progress saved", body = CourseDetail),
        (status = 404, description = "Course not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Course ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<UpdateProgressPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let store = state.courses.for_user(user_id);

    // First, ensure the course exists and belongs to the user.
    let mut course = store
        .get_course(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Course with id '{}' not found", id)))?;

    store.update_progress(&id, &payload.completed_lessons).await?;
    course.completed_lessons = payload.completed_lessons;
    info!(course_id = %id, completed = course.completed_lessons.len(), "Progress updated");

    Ok((StatusCode::OK, Json(CourseDetail::from(course))))
}

/// Get the stored theme preference.
#[utoipa::path(
    get,
    path = "/preferences/theme",
    responses(
        (status = 200, description = "Current theme", body = ThemeResponse)
    )
)]
pub async fn get_theme(State(state): State<Arc<AppState>>) -> Json<ThemeResponse> {
    Json(ThemeResponse {
        theme: state.preferences.theme().await,
    })
}

/// Flip between the light and dark theme.
#[utoipa::path(
    post,
    path = "/preferences/theme/toggle",
    responses(
        (status = 200, description = "New theme", body = ThemeResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn toggle_theme(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ThemeResponse>, ApiError> {
    let theme = state.preferences.toggle_theme().await?;
    Ok(Json(ThemeResponse { theme }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_id_header_is_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(user_id(&headers), Err(ApiError::BadRequest(_))));

        headers.insert("x-user-id", HeaderValue::from_static("  "));
        assert!(matches!(user_id(&headers), Err(ApiError::BadRequest(_))));

        headers.insert("x-user-id", HeaderValue::from_static("user_42"));
        assert_eq!(user_id(&headers).unwrap(), "user_42");
    }

    #[test]
    fn test_api_error_status_codes() {
        let not_found = ApiError::NotFound("missing".to_string()).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let internal = ApiError::from(anyhow::anyhow!("db down")).into_response();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
