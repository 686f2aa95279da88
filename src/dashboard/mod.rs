//! Server assembly: HTTP router, WebSocket hub, watcher, and the background
//! tasks that keep the snapshot fresh.

mod handlers;
mod types;
pub mod ws;

use axum::http::{header, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::analyzer::{ConversationAnalyzer, StateChange};
use crate::cache::{CacheConfig, DataCache};
use crate::config::Config;
use crate::error::{LookoutError, Result};
use crate::perf::PerfMonitor;
use crate::process::ProcessDetector;
use crate::watcher::{FileWatcher, WatcherConfig};
use ws::{Channel, NotificationHub, ServerFrame};

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<ConversationAnalyzer>,
    pub cache: Arc<DataCache>,
    pub perf: Arc<PerfMonitor>,
    pub hub: Arc<NotificationHub>,
}

pub async fn run(config: Config) -> Result<()> {
    // Root must be readable before anything else spins up.
    std::fs::read_dir(&config.root).map_err(|e| LookoutError::SnapshotUnavailable {
        root: config.root.clone(),
        source: e,
    })?;

    let perf = Arc::new(PerfMonitor::new());
    let cache = Arc::new(DataCache::new(CacheConfig::default()));
    let analyzer = Arc::new(ConversationAnalyzer::new(
        config.root.clone(),
        cache.clone(),
        perf.clone(),
        ProcessDetector::default(),
        config.thresholds,
    ));
    let hub = Arc::new(NotificationHub::new(
        config.outbox_cap,
        config.heartbeat_interval,
        perf.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (data_tx, data_rx) = mpsc::unbounded_channel::<PathBuf>();
    let (proc_tx, proc_rx) = mpsc::unbounded_channel::<PathBuf>();
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel::<()>();
    let (change_tx, change_rx) = mpsc::unbounded_channel::<StateChange>();

    hub.set_refresh_listener(refresh_tx);
    analyzer.set_change_listener(change_tx);

    let mut watcher = FileWatcher::start(
        &config.root,
        WatcherConfig {
            debounce: config.debounce,
            ..Default::default()
        },
        cache.clone(),
        perf.clone(),
        {
            let tx = data_tx.clone();
            move |path| {
                let _ = tx.send(path);
            }
        },
        {
            let tx = proc_tx.clone();
            move |path| {
                let _ = tx.send(path);
            }
        },
    )?;

    // First snapshot before accepting traffic; failures here are logged, not
    // fatal — an empty tree is a valid state.
    if let Err(e) = analyzer.rebuild_snapshot().await {
        warn!(error = %e, "initial snapshot rebuild failed");
        perf.set_degraded(true);
    }

    spawn_rebuild_loop(
        analyzer.clone(),
        hub.clone(),
        perf.clone(),
        data_rx,
        proc_rx,
        refresh_rx,
        shutdown_rx.clone(),
    );
    spawn_change_forwarder(hub.clone(), change_rx, shutdown_rx.clone());
    spawn_sweep_task(cache.clone(), shutdown_rx.clone());
    spawn_health_task(
        hub.clone(),
        perf.clone(),
        cache.clone(),
        shutdown_rx.clone(),
    );

    let state = AppState {
        analyzer: analyzer.clone(),
        cache,
        perf,
        hub,
    };

    let addr = SocketAddr::new(config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual = listener.local_addr()?;

    let app = router(state, &config, actual.port());
    print_banner(&config, actual.port(), analyzer.as_ref());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    analyzer.cancel();
    watcher.stop();
    let _ = shutdown_tx.send(true);
    info!("server stopped");
    Ok(())
}

fn router(state: AppState, config: &Config, port: u16) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            format!("http://127.0.0.1:{port}").parse().unwrap(),
            format!("http://localhost:{port}").parse().unwrap(),
        ])
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let mut app = Router::new()
        .route("/api/data", get(handlers::data))
        .route("/api/conversation-state", get(handlers::conversation_state))
        .route("/api/session/{id}", get(handlers::session))
        .route("/api/charts/tokens", get(handlers::charts_tokens))
        .route("/api/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors)
        .layer(middleware::from_fn(security_headers));

    if !config.allow_remote {
        app = app.layer(middleware::from_fn(validate_host));
    }

    app.with_state(state)
}

/// DNS-rebinding guard: loopback-bound servers only answer loopback hosts.
async fn validate_host(req: Request<axum::body::Body>, next: Next) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let hostname = host.split(':').next().unwrap_or("");
    if !matches!(hostname, "127.0.0.1" | "localhost" | "[::1]" | "") {
        return StatusCode::FORBIDDEN.into_response();
    }
    next.run(req).await
}

async fn security_headers(req: Request<axum::body::Body>, next: Next) -> Response {
    let is_api = req.uri().path().starts_with("/api/");
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    if is_api {
        headers.insert("Cache-Control", "no-store".parse().unwrap());
    }
    response
}

fn spawn_rebuild_loop(
    analyzer: Arc<ConversationAnalyzer>,
    hub: Arc<NotificationHub>,
    perf: Arc<PerfMonitor>,
    mut data_rx: mpsc::UnboundedReceiver<PathBuf>,
    mut proc_rx: mpsc::UnboundedReceiver<PathBuf>,
    mut refresh_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            let source = tokio::select! {
                _ = shutdown.changed() => break,
                event = data_rx.recv() => match event {
                    Some(_) => "watcher",
                    None => break,
                },
                event = proc_rx.recv() => match event {
                    Some(_) => "process_hint",
                    None => break,
                },
                event = refresh_rx.recv() => match event {
                    Some(()) => "refresh_request",
                    None => break,
                },
            };

            match analyzer.maybe_rebuild().await {
                Ok(snapshot) => {
                    if perf.is_degraded() {
                        perf.set_degraded(false);
                    }
                    hub.broadcast(
                        Channel::DataUpdates,
                        ServerFrame::DataRefresh {
                            source: source.to_string(),
                            snapshot_version: snapshot.snapshot_version,
                        },
                    );
                }
                Err(e) => {
                    warn!(error = %e, source, "snapshot rebuild failed");
                    perf.record_error(e.kind());
                    perf.set_degraded(true);
                    hub.broadcast(
                        Channel::SystemUpdates,
                        ServerFrame::SystemHealth {
                            metrics: serde_json::to_value(perf.summary(0.0))
                                .unwrap_or_default(),
                        },
                    );
                }
            }
        }
    });
}

fn spawn_change_forwarder(
    hub: Arc<NotificationHub>,
    mut change_rx: mpsc::UnboundedReceiver<StateChange>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                change = change_rx.recv() => {
                    let Some(change) = change else { break };
                    hub.broadcast(
                        Channel::ConversationUpdates,
                        ServerFrame::ConversationStateChange {
                            filepath: change.filepath,
                            old_state: change.old_state,
                            new_state: change.new_state,
                            at: change.at,
                        },
                    );
                }
            }
        }
    });
}

fn spawn_sweep_task(cache: Arc<DataCache>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(cache.sweep_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tick.tick() => cache.sweep(),
            }
        }
    });
}

fn spawn_health_task(
    hub: Arc<NotificationHub>,
    perf: Arc<PerfMonitor>,
    cache: Arc<DataCache>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tick.tick() => {
                    let metrics = perf.summary(cache.stats.hit_rate());
                    hub.broadcast(
                        Channel::SystemUpdates,
                        ServerFrame::SystemHealth {
                            metrics: serde_json::to_value(metrics).unwrap_or_default(),
                        },
                    );
                }
            }
        }
    });
}

fn print_banner(config: &Config, port: u16, analyzer: &ConversationAnalyzer) {
    let version = env!("CARGO_PKG_VERSION");
    let conversations = analyzer
        .snapshot()
        .map(|s| s.aggregates.conversation_count)
        .unwrap_or(0);
    let bind_note = if config.bind.is_loopback() {
        String::new()
    } else {
        format!(" (bound to {} — remote access enabled)", config.bind)
    };

    eprintln!();
    eprintln!("[lookout] v{version} watching {}", config.root.display());
    eprintln!("[lookout] dashboard  http://127.0.0.1:{port}{bind_note}");
    eprintln!("[lookout] websocket  ws://127.0.0.1:{port}/ws");
    eprintln!("[lookout] tracking {conversations} conversation(s)");
    eprintln!("[lookout] Ctrl+C to stop");
    eprintln!();
}
