mod auth;
mod config;
mod middleware;

mod db;
mod error;
mod gateway;
mod messaging;
mod models;
mod reactivation;
mod routes;

use std::sync::Arc;

use crate::{
    config::{Config, DataBackend},
    gateway::{DataGateway, InMemoryGateway, PostgresGateway},
    messaging::SimulatedTransport,
    models::AppState,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

const DEMO_PASSWORD: &str = "demo1234";

async fn build_gateway(cfg: &Config) -> anyhow::Result<Arc<dyn DataGateway>> {
    match cfg.backend {
        DataBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
            let pool = db::connect_pg(url, cfg.database_max_connections).await?;
            if cfg.run_migrations {
                db::run_migrations(&pool).await?;
            }
            Ok(Arc::new(PostgresGateway::new(pool)))
        }
        DataBackend::Memory => {
            let hash = auth::hash_password(DEMO_PASSWORD).map_err(anyhow::Error::msg)?;
            let gateway = InMemoryGateway::with_demo_data(&hash, chrono::Utc::now())?;
            tracing::warn!(
                "in-memory backend: data is lost on restart. Demo logins owner@demo.clinic, \
                 assistant@demo.clinic, dentist@demo.clinic (password {DEMO_PASSWORD})"
            );
            Ok(Arc::new(gateway))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let gateway = build_gateway(&cfg).await?;

    let state = AppState {
        gateway,
        transport: Arc::new(SimulatedTransport),
        session_ttl_hours: cfg.session_ttl_hours,
        clinic_tz: cfg.clinic_timezone,
    };

    // Browser clients call the API from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(
        backend = ?cfg.backend,
        timezone = %cfg.clinic_timezone,
        "Listening on http://{}",
        cfg.bind_addr
    );
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
