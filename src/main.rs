use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use intake_core::constants::DEFAULT_DB_PATH;
use intake_core::{IntakeService, OpenAiClient, ReportConfig, ReportService, SqliteStore};

/// Main entry point for the intake report service
///
/// Opens the SQLite document store and serves the REST API (with Swagger UI at
/// `/swagger-ui`).
///
/// # Environment Variables
/// - `INTAKE_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `INTAKE_DB_PATH`: SQLite database file (default: "intake.db")
/// - `OPENAI_API_KEY`: model provider key; report generation is refused without it
/// - `API_KEY`: when set, required as `x-api-key` on every route except `/health`
/// - `INTAKE_*`: quota, spend, retry and model settings, see `ReportConfig::from_lookup`
///
/// # Errors
/// Returns an error if:
/// - the configuration is invalid,
/// - the database cannot be opened, or
/// - the server address cannot be bound.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("intake_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ReportConfig::from_lookup(|k| std::env::var(k).ok())?;

    let openai_key = std::env::var("OPENAI_API_KEY").ok();
    if openai_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
        tracing::warn!("OPENAI_API_KEY is not set; report generation will be refused");
    }
    let model = OpenAiClient::new(config.model_endpoint.clone(), openai_key, config.model_timeout)?;

    let db_path =
        PathBuf::from(std::env::var("INTAKE_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.into()));
    let store = Arc::new(SqliteStore::open(&db_path)?);

    let api_key = std::env::var("API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .map(Arc::from);
    if api_key.is_none() {
        tracing::warn!("API_KEY is not set; REST routes are open");
    }

    tracing::info!(
        model = %config.model,
        prompt_version = %config.prompt_version,
        admin_daily_limit = config.admin_daily_limit,
        intake_daily_limit = config.intake_daily_limit,
        db = %db_path.display(),
        "configuration loaded"
    );

    let state = AppState {
        intakes: Arc::new(IntakeService::new(store.clone())),
        reports: Arc::new(ReportService::new(store, Arc::new(model), config)?),
        api_key,
    };

    let addr = std::env::var("INTAKE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    tracing::info!("++ Starting intake REST API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
