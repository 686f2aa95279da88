//! JSON shapes for the read API. Every response carries the snapshot version
//! so clients can detect staleness across HTTP and WebSocket.

use crate::analyzer::Conversation;
use crate::perf::HealthSummary;
use crate::state::ConversationState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
pub struct ConversationStateResponse {
    pub snapshot_version: u64,
    pub states: BTreeMap<String, ConversationState>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub snapshot_version: u64,
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenSeriesPoint {
    pub bucket: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
}

#[derive(Serialize)]
pub struct TokenChartResponse {
    pub snapshot_version: u64,
    pub series: Vec<TokenSeriesPoint>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub snapshot_version: u64,
    #[serde(flatten)]
    pub summary: HealthSummary,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}
