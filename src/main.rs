//! Student Risk Engine: binary entrypoint.
//! Loads config, picks the store, wires the engine and serves the Axum router.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use student_risk_engine::ai_bootstrap::AiRuntime;
use student_risk_engine::config::EngineConfig;
use student_risk_engine::metrics::Metrics;
use student_risk_engine::store::{memory::MemoryStore, postgres::PgStore, DynStore};
use student_risk_engine::{create_router, RiskEngine};

/// `RUST_LOG` filter (default `student_risk_engine=info,warn`);
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("student_risk_engine=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = EngineConfig::load().context("loading engine config")?;
    let ai = AiRuntime::load_default().context("loading AI config")?;
    if std::env::var("AI_QUICK_PROBE").is_ok_and(|v| v == "1") {
        ai.quick_probe().await;
    }

    let store: DynStore = match config.database.url.as_deref() {
        Some(url) => {
            let pg = PgStore::connect(url, config.database.max_connections)
                .await
                .context("connecting to Postgres")?;
            info!("using PostgreSQL store");
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    let metrics = Metrics::init();
    let engine = Arc::new(RiskEngine::new(&config, ai.client.clone(), ai.timeout(), store));
    let router = create_router(engine, &metrics);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.server.host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, threshold = config.alerts.risk_threshold, "student risk engine listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;
    Ok(())
}
