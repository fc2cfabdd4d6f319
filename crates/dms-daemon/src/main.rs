//! dms-daemon entry point.
//!
//! Thin on purpose: config, tracing, store, shared state, middleware, then
//! serve until Ctrl-C / SIGTERM and drain the progression registry.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use dms_daemon::{routes, state};
use dms_progression::ProgressionConfig;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = dms_config::load_from_env().context("load config")?;
    let mut cfg = loaded.daemon()?;
    cfg.apply_env_overrides()?;
    info!(
        config_hash = %loaded.config_hash,
        store = cfg.store.backend.as_str(),
        tick_ms = cfg.progression.tick_ms,
        "config loaded"
    );

    let store = state::open_store(&cfg).await?;
    let shared = Arc::new(state::AppState::new(
        store,
        ProgressionConfig {
            tick: Duration::from_millis(cfg.progression.tick_ms),
        },
        cfg.bus.capacity,
    ));

    if cfg.progression.resume_on_boot {
        state::resume_in_flight(&shared).await?;
    }

    let heartbeat =
        state::spawn_heartbeat(shared.bus.clone(), Duration::from_millis(cfg.bus.heartbeat_ms));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("CONFIG_INVALID: bad bind address {}", cfg.server.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("dms-daemon listening on http://{}", addr);

    let on_signal = Arc::clone(&shared);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            on_signal.close_streams();
        })
        .await
        .context("server crashed")?;

    heartbeat.abort();
    let report = shared
        .progression
        .shutdown(Duration::from_millis(cfg.progression.shutdown_grace_ms))
        .await;
    if report.aborted > 0 || report.panicked > 0 {
        warn!(
            aborted = report.aborted,
            panicked = report.panicked,
            "progression tasks did not all end cleanly"
        );
    }
    info!(joined = report.exits.len(), "dms-daemon stopped");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
