use std::net::SocketAddr;
use std::sync::Arc;

use http::HeaderValue;
use mockable::DefaultClock;
use pollbox::cache::{evict_changed_polls, MemoryViewCache};
use pollbox::config::{Config, ConfigError};
use pollbox::handlers::AppState;
use pollbox::results::VoteFeed;
use pollbox::service::PollService;
use pollbox::store::{forward_vote_changes, PgPollStore};
use pollbox::{db, routes};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid CORS_ALLOW_ORIGIN: {0}")]
    CorsOrigin(#[from] http::header::InvalidHeaderValue),

    #[error("failed to connect to the database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to apply migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    dotenvy::dotenv().ok(); // Load environment variables from .env file

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pollbox=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let cors_origin = config
        .cors_allow_origin
        .as_deref()
        .map(HeaderValue::from_str)
        .transpose()?;

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let feed = VoteFeed::default();
    tokio::spawn({
        let pool = pool.clone();
        let feed = feed.clone();
        async move {
            if let Err(err) = forward_vote_changes(pool, feed).await {
                error!(error = %err, "live results disabled");
            }
        }
    });

    let views = Arc::new(MemoryViewCache::new());
    tokio::spawn(evict_changed_polls(Arc::clone(&views), feed.subscribe()));
    let service = PollService::new(
        Arc::new(PgPollStore::new(pool.clone())),
        Arc::clone(&views),
        Arc::new(DefaultClock),
    );
    let state = AppState {
        pool,
        service,
        views,
        feed,
    };
    let app = routes::create_routes(state, cors_origin.as_ref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");
    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
