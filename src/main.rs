use actix_web::{web, App, HttpServer, middleware::Compress};
use anyhow::Context;
use utoipa_swagger_ui::SwaggerUi;

use topic_tutor::config::AppConfig;
use topic_tutor::generator::LlmGenerator;
use topic_tutor::openapi::ApiDoc;
use topic_tutor::repo::Repo;
use topic_tutor::telemetry::{self, RequestMetrics};
use topic_tutor::{config, AppState, Pipeline};
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;
use tracing_actix_web::TracingLogger;

#[cfg(feature = "inmem-store")]
fn fallback_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use topic_tutor::repo::inmem::InMemRepo;
    let repo = match &cfg.data_dir {
        Some(dir) => InMemRepo::with_snapshot_dir(dir),
        None => InMemRepo::new(),
    };
    info!("Using in-memory repository backend (snapshot dir: {:?})", cfg.data_dir);
    Ok(Arc::new(repo))
}

#[cfg(not(feature = "inmem-store"))]
fn fallback_repo(_cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    anyhow::bail!("DATABASE_URL must be set when the in-memory store is not compiled in")
}

async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    #[cfg(feature = "postgres-store")]
    if let Some(url) = cfg.database_url.as_deref() {
        use sqlx::postgres::PgPoolOptions;
        use topic_tutor::repo::pg::PgRepo;
        let pool = PgPoolOptions::new()
            .max_connections(cfg.db_max_connections)
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;
        let repo = PgRepo::new(pool);
        repo.migrate().await.context("failed to apply migrations")?;
        info!("Using Postgres repository backend");
        return Ok(Arc::new(repo));
    }
    fallback_repo(cfg)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping topic-tutor server");

    let metrics = if cfg.metrics_enabled {
        Some(telemetry::install_recorder().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let repo = build_repo(&cfg).await?;

    let generator = LlmGenerator::new(cfg.llm.clone()).context("failed to build LLM client")?;
    if !generator.has_api_key() {
        warn!("LLM_API_KEY is not set: explanations will fail until it is configured");
    }
    info!("LLM endpoint: {} model: {}", cfg.llm.api_base, cfg.llm.model);

    let pipeline = Pipeline::new(repo.clone(), Arc::new(generator)).with_grace_period(cfg.grace_period);

    if metrics.is_some() {
        telemetry::spawn_stats_refresher(repo, cfg.stats_interval);
    }

    let openapi = ApiDoc::openapi();
    let state = AppState { pipeline, metrics };

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(RequestMetrics)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.host.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.host, cfg.port);

    server.run().await?;
    Ok(())
}
