//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{CourseDetail, CourseSummary, ErrorResponse, ThemeResponse, UpdateProgressPayload},
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_courses,
        handlers::get_course,
        handlers::update_progress,
        handlers::get_theme,
        handlers::toggle_theme,
    ),
    components(
        schemas(CourseSummary, CourseDetail, UpdateProgressPayload, ThemeResponse, ErrorResponse)
    ),
    tags(
        (name = "Course Builder API", description = "Course history, progress and preferences for the streaming course builder")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/courses", get(handlers::list_courses))
        .route("/courses/{id}", get(handlers::get_course))
        .route("/courses/{id}/progress", put(handlers::update_progress))
        .route("/preferences/theme", get(handlers::get_theme))
        .route("/preferences/theme/toggle", post(handlers::toggle_theme))
        .route("/ws", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_rest_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/courses",
            "/courses/{id}",
            "/courses/{id}/progress",
            "/preferences/theme",
            "/preferences/theme/toggle",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
