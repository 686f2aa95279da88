//! WebSocket hub: client registry, channel subscriptions, bounded outboxes,
//! and heartbeats.
//!
//! Each connection gets one session with a bounded frame queue. Broadcasts
//! walk current subscribers under a read lock and enqueue; the per-connection
//! task is the only writer to its socket, so frames on a channel reach each
//! client in emit order. Overflow drops the oldest non-heartbeat frame and
//! bumps a counter — slow dashboards lose history, never the server.

use crate::dashboard::AppState;
use crate::perf::PerfMonitor;
use crate::state::ConversationState;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Close code sent when a client breaks the frame protocol.
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Close code for heartbeat timeouts.
const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    DataUpdates,
    ConversationUpdates,
    SystemUpdates,
}

impl Channel {
    pub const ALL: [Channel; 3] = [
        Channel::DataUpdates,
        Channel::ConversationUpdates,
        Channel::SystemUpdates,
    ];
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { channel: Channel },
    Unsubscribe { channel: Channel },
    RefreshRequest,
    Ping,
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connection {
        version: String,
        channels: Vec<Channel>,
    },
    SubscriptionConfirmed {
        channel: Channel,
    },
    Ping,
    Pong,
    DataRefresh {
        source: String,
        snapshot_version: u64,
    },
    ConversationStateChange {
        filepath: PathBuf,
        old_state: ConversationState,
        new_state: ConversationState,
        at: DateTime<Utc>,
    },
    SystemHealth {
        metrics: serde_json::Value,
    },
}

impl ServerFrame {
    fn is_heartbeat(&self) -> bool {
        matches!(self, ServerFrame::Ping | ServerFrame::Pong)
    }
}

pub struct ClientSession {
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    subscriptions: RwLock<HashSet<Channel>>,
    outbox: Mutex<VecDeque<ServerFrame>>,
    wakeup: tokio::sync::Notify,
    last_seen: Mutex<Instant>,
}

impl ClientSession {
    fn new() -> Self {
        ClientSession {
            // v7: time-ordered, so ids sort by connection time.
            client_id: uuid::Uuid::now_v7().to_string(),
            connected_at: Utc::now(),
            subscriptions: RwLock::new(HashSet::new()),
            outbox: Mutex::new(VecDeque::new()),
            wakeup: tokio::sync::Notify::new(),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn subscribe(&self, channel: Channel) {
        self.subscriptions.write().unwrap().insert(channel);
    }

    pub fn unsubscribe(&self, channel: Channel) {
        self.subscriptions.write().unwrap().remove(&channel);
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.subscriptions.read().unwrap().contains(&channel)
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap() = Instant::now();
    }

    /// Queue a frame, evicting the oldest non-heartbeat frame on overflow.
    /// Returns true when something was dropped.
    fn enqueue(&self, frame: ServerFrame, cap: usize) -> bool {
        let mut outbox = self.outbox.lock().unwrap();
        let mut dropped = false;
        if outbox.len() >= cap {
            let victim = outbox
                .iter()
                .position(|f| !f.is_heartbeat())
                .unwrap_or(0);
            outbox.remove(victim);
            dropped = true;
        }
        outbox.push_back(frame);
        drop(outbox);
        self.wakeup.notify_one();
        dropped
    }

    pub fn drain(&self) -> Vec<ServerFrame> {
        self.outbox.lock().unwrap().drain(..).collect()
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().unwrap().len()
    }
}

pub struct NotificationHub {
    clients: RwLock<HashMap<String, Arc<ClientSession>>>,
    outbox_cap: usize,
    heartbeat_interval: Duration,
    perf: Arc<PerfMonitor>,
    refresh_tx: Mutex<Option<UnboundedSender<()>>>,
    version: String,
}

impl NotificationHub {
    pub fn new(outbox_cap: usize, heartbeat_interval: Duration, perf: Arc<PerfMonitor>) -> Self {
        NotificationHub {
            clients: RwLock::new(HashMap::new()),
            outbox_cap,
            heartbeat_interval,
            perf,
            refresh_tx: Mutex::new(None),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Channel poked whenever a client asks for an explicit refresh.
    pub fn set_refresh_listener(&self, tx: UnboundedSender<()>) {
        *self.refresh_tx.lock().unwrap() = Some(tx);
    }

    pub fn register(&self) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::new());
        self.clients
            .write()
            .unwrap()
            .insert(session.client_id.clone(), session.clone());
        self.perf.incr("hub.connections");
        session
    }

    pub fn remove(&self, client_id: &str) {
        self.clients.write().unwrap().remove(client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    /// Fan a frame out to every subscriber of `channel`, in registry order.
    pub fn broadcast(&self, channel: Channel, frame: ServerFrame) {
        let clients = self.clients.read().unwrap();
        for session in clients.values() {
            if !session.is_subscribed(channel) {
                continue;
            }
            if session.enqueue(frame.clone(), self.outbox_cap) {
                self.perf.incr("hub.overflow_drops");
            }
        }
    }

    /// Direct send to one session, bypassing subscriptions (handshake and
    /// heartbeat traffic).
    pub fn send_to(&self, session: &ClientSession, frame: ServerFrame) {
        if session.enqueue(frame, self.outbox_cap) {
            self.perf.incr("hub.overflow_drops");
        }
    }

    pub fn connection_frame(&self) -> ServerFrame {
        ServerFrame::Connection {
            version: self.version.clone(),
            channels: Channel::ALL.to_vec(),
        }
    }

    fn request_refresh(&self) {
        if let Some(tx) = self.refresh_tx.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Axum connection handling
// ---------------------------------------------------------------------------

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let session = state.hub.register();
    let client_id = session.client_id.clone();
    info!(client_id, "dashboard client connected");

    let (mut tx, mut rx) = socket.split();
    state.hub.send_to(&session, state.hub.connection_frame());

    let mut heartbeat = tokio::time::interval(state.hub.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // the interval's immediate first tick
    let mut missed_pongs = 0u32;

    'session: loop {
        tokio::select! {
            inbound = rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        session.touch();
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => {
                                if let ClientFrame::Pong = frame {
                                    missed_pongs = 0;
                                }
                                handle_client_frame(frame, &session, &state);
                            }
                            Err(e) => {
                                warn!(client_id, error = %e, "unparseable client frame");
                                state.perf.record_error("ClientProtocolError");
                                let _ = tx
                                    .send(WsMessage::Close(Some(CloseFrame {
                                        code: CLOSE_PROTOCOL_ERROR,
                                        reason: "unparseable frame".into(),
                                    })))
                                    .await;
                                break 'session;
                            }
                        }
                    }
                    // Transport-level ping; axum answers pongs itself but be
                    // explicit about liveness.
                    Some(Ok(WsMessage::Ping(_))) => session.touch(),
                    Some(Ok(WsMessage::Pong(_))) => {
                        session.touch();
                        missed_pongs = 0;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break 'session,
                    Some(Err(e)) => {
                        debug!(client_id, error = %e, "socket read error");
                        break 'session;
                    }
                    _ => {}
                }
            }

            _ = session.wakeup.notified() => {
                for frame in session.drain() {
                    let json = match serde_json::to_string(&frame) {
                        Ok(j) => j,
                        Err(_) => continue,
                    };
                    if tx.send(WsMessage::Text(json.into())).await.is_err() {
                        break 'session;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if missed_pongs >= 2 {
                    warn!(client_id, "heartbeat timeout, closing session");
                    let _ = tx
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: CLOSE_GOING_AWAY,
                            reason: "heartbeat timeout".into(),
                        })))
                        .await;
                    break 'session;
                }
                missed_pongs += 1;
                state.hub.send_to(&session, ServerFrame::Ping);
            }
        }
    }

    state.hub.remove(&client_id);
    info!(client_id, "dashboard client disconnected");
}

fn handle_client_frame(frame: ClientFrame, session: &Arc<ClientSession>, state: &AppState) {
    match frame {
        ClientFrame::Subscribe { channel } => {
            session.subscribe(channel);
            state
                .hub
                .send_to(session, ServerFrame::SubscriptionConfirmed { channel });
        }
        ClientFrame::Unsubscribe { channel } => session.unsubscribe(channel),
        ClientFrame::RefreshRequest => {
            // Acknowledged by the data_refresh broadcast that follows the
            // rebuild, not by a direct reply.
            state.cache.invalidate_computations();
            state.hub.request_refresh();
        }
        ClientFrame::Ping => state.hub.send_to(session, ServerFrame::Pong),
        ClientFrame::Pong => {}
    }
}
