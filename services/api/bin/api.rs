//! Main Entrypoint for the Course Builder API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting to the database and running migrations, or falling back to
//!    the in-memory course store when no database is configured.
//! 3. Initializing shared services (the Gemini client, prompts, exporter).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use coursecraft_api::{
    config::Config,
    db::Db,
    router::create_router,
    state::{AppState, CourseBackend},
};
use coursecraft_core::{
    export::HtmlDocumentExporter,
    llm_client::{GeminiClient, GeminiConfig},
    preferences::PreferenceStore,
    prompts::PromptSet,
};
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads prompt overrides from a directory of Markdown files keyed by file stem.
fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    if !prompts_path.is_dir() {
        info!(path = %prompts_path.display(), "No prompts directory; using built-in prompts.");
        return Ok(prompts);
    }
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Course Storage ---
    let courses = match &config.database_url {
        Some(database_url) => {
            let pool = PgPool::connect(database_url)
                .await
                .context("Failed to connect to database")?;
            let db = Arc::new(Db::new(pool));
            db.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            CourseBackend::Postgres(db)
        }
        None => {
            warn!("DATABASE_URL not set. Courses are kept in memory and lost on restart.");
            CourseBackend::in_memory()
        }
    };

    // --- 4. Initialize Shared Services ---
    let overrides = load_prompts(&config.prompts_path)?;
    info!(overrides = overrides.len(), "Prompt templates loaded.");
    let prompts = Arc::new(PromptSet::from_overrides(overrides));

    let llm_client = Arc::new(GeminiClient::new(
        GeminiConfig::new(config.gemini_api_key.clone(), config.chat_model.clone())
            .with_base_url(config.gemini_base_url.clone()),
    ));

    let preferences = PreferenceStore::new(config.preferences_path.clone());
    info!(theme = ?preferences.theme().await, "Theme preference loaded.");

    let app_state = Arc::new(AppState {
        courses,
        llm_client,
        prompts,
        preferences,
        exporter: Arc::new(HtmlDocumentExporter::new(config.export_dir.clone())),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        offline = config.database_url.is_none(),
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
