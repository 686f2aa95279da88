//! Read-only JSON endpoints over the analyzer's cached snapshots.

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Timelike, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use super::types::*;
use super::AppState;
use crate::analyzer::Snapshot;
use crate::error::LookoutError;

fn error_response(e: &LookoutError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: e.to_string(),
            kind: e.kind(),
        }),
    )
        .into_response()
}

/// GET /api/data — the full snapshot.
pub async fn data(State(state): State<AppState>) -> Response {
    match state.analyzer.maybe_rebuild().await {
        Ok(snapshot) => Json(snapshot.as_ref().clone()).into_response(),
        Err(e) => {
            state.perf.record_error(e.kind());
            error_response(&e)
        }
    }
}

/// GET /api/conversation-state — filepath → state map.
pub async fn conversation_state(State(state): State<AppState>) -> Response {
    match state.analyzer.maybe_rebuild().await {
        Ok(snapshot) => {
            let states: BTreeMap<String, _> = snapshot
                .conversations
                .iter()
                .map(|c| (c.filepath.to_string_lossy().into_owned(), c.state))
                .collect();
            Json(ConversationStateResponse {
                snapshot_version: snapshot.snapshot_version,
                states,
            })
            .into_response()
        }
        Err(e) => {
            state.perf.record_error(e.kind());
            error_response(&e)
        }
    }
}

/// GET /api/session/{id} — one conversation with its full message list.
pub async fn session(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.analyzer.maybe_rebuild().await {
        Ok(snapshot) => match snapshot.conversation(&id) {
            Some(conversation) => Json(SessionResponse {
                snapshot_version: snapshot.snapshot_version,
                conversation: conversation.clone(),
            })
            .into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: format!("unknown session '{id}'"),
                    kind: "NotFound",
                }),
            )
                .into_response(),
        },
        Err(e) => {
            state.perf.record_error(e.kind());
            error_response(&e)
        }
    }
}

/// GET /api/charts/tokens — hourly token usage series, memoized per snapshot
/// version in the computation cache.
pub async fn charts_tokens(State(state): State<AppState>) -> Response {
    let snapshot = match state.analyzer.maybe_rebuild().await {
        Ok(s) => s,
        Err(e) => {
            state.perf.record_error(e.kind());
            return error_response(&e);
        }
    };

    let key = format!("charts.tokens.v{}", snapshot.snapshot_version);
    let series = state
        .cache
        .get_computed(
            &key,
            Vec::new(),
            Some(Duration::from_secs(60)),
            || async { Ok(token_series(&snapshot)) },
        )
        .await;

    match series {
        Ok(series) => Json(TokenChartResponse {
            snapshot_version: snapshot.snapshot_version,
            series: series.as_ref().clone(),
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/health — PerfMonitor summary.
pub async fn health(State(state): State<AppState>) -> Response {
    let snapshot_version = state
        .analyzer
        .snapshot()
        .map(|s| s.snapshot_version)
        .unwrap_or(0);
    Json(HealthResponse {
        snapshot_version,
        summary: state.perf.summary(state.cache.stats.hit_rate()),
    })
    .into_response()
}

fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Bucket every message's token usage by hour, across all conversations.
pub(super) fn token_series(snapshot: &Snapshot) -> Vec<TokenSeriesPoint> {
    let mut buckets: BTreeMap<DateTime<Utc>, TokenSeriesPoint> = BTreeMap::new();
    for conversation in &snapshot.conversations {
        for message in &conversation.messages {
            let (Some(ts), Some(usage)) = (message.timestamp, &message.usage) else {
                continue;
            };
            let bucket = truncate_to_hour(ts);
            let point = buckets.entry(bucket).or_insert_with(|| TokenSeriesPoint {
                bucket,
                ..Default::default()
            });
            point.input_tokens += usage.input_tokens;
            point.output_tokens += usage.output_tokens;
            point.cache_read_input_tokens += usage.cache_read_input_tokens;
            point.cache_creation_input_tokens += usage.cache_creation_input_tokens;
        }
    }
    buckets.into_values().collect()
}
