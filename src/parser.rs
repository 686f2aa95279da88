//! Parser for append-only `.jsonl` conversation logs.
//!
//! Each line is one JSON entry written by the assistant process. Only `user`
//! and `assistant` entries matter here; everything else (progress markers,
//! file snapshots, compaction summaries) is skipped. Tool invocations are
//! correlated in three passes: index every `tool_use` block by id, attach
//! each `tool_result` to the assistant message that issued the call, then
//! emit the surface sequence without the result-carrier user entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// `message.content` is a string, a single block, or an array of blocks.
/// Variant order matters: `Block`'s `Unknown` fallback would otherwise
/// swallow arrays before `Blocks` is tried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Block(Box<ContentBlock>),
}

impl MessageContent {
    /// Iterate blocks regardless of shape. A bare string yields nothing.
    pub fn blocks(&self) -> std::slice::Iter<'_, ContentBlock> {
        match self {
            MessageContent::Text(_) => (&[] as &[ContentBlock]).iter(),
            MessageContent::Block(b) => std::slice::from_ref(&**b).iter(),
            MessageContent::Blocks(v) => v.iter(),
        }
    }
}

/// Known block shapes keep their `type` tag; anything else is carried raw so
/// unknown block kinds round-trip through the API untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    Known(BlockPayload),
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockPayload {
    Text {
        text: String,
        #[serde(flatten)]
        extra: serde_json::Map<String, Value>,
    },
    ToolUse {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        input: Value,
        #[serde(flatten)]
        extra: serde_json::Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(flatten)]
        extra: serde_json::Map<String, Value>,
    },
}

impl ContentBlock {
    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            ContentBlock::Known(BlockPayload::ToolUse { id, .. }) => Some(id),
            _ => None,
        }
    }
}

/// Token counters from one API turn. All fields default to zero — older logs
/// omit the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// A tool result merged with the peer metadata its source entry carried
/// alongside the block (`toolUseResult` in the raw log).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedToolResult {
    pub tool_use_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_image: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code_interpretation: Option<String>,
}

impl EnhancedToolResult {
    /// True when the outcome looks like a failure the classifier cares about.
    pub fn is_failure(&self) -> bool {
        self.interrupted == Some(true)
            || self.stderr.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Canonical post-parse message, the unit all downstream consumers see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub is_compact_summary: bool,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<EnhancedToolResult>,
}

impl Message {
    /// Ids of `tool_use` blocks with no attached result.
    pub fn unresolved_tool_uses(&self) -> Vec<&str> {
        self.content
            .blocks()
            .filter_map(|b| b.tool_use_id())
            .filter(|id| !self.tool_results.iter().any(|r| r.tool_use_id == *id))
            .collect()
    }

    pub fn has_unresolved_tool_use(&self) -> bool {
        !self.unresolved_tool_uses().is_empty()
    }
}

/// Output of one parse call. Line failures never fail the call; they are
/// counted here and reported through PerfMonitor by the caller.
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    pub messages: Vec<Message>,
    pub line_errors: u64,
    pub orphan_results: u64,
}

// ---------------------------------------------------------------------------
// Raw deserialization shapes (log wire format, camelCase where the log is)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawEntry {
    #[serde(rename = "type")]
    entry_type: Option<String>,
    uuid: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    message: Option<RawMessage>,
    #[serde(rename = "isCompactSummary")]
    is_compact_summary: Option<bool>,
    #[serde(rename = "isSidechain")]
    is_sidechain: Option<bool>,
}

#[derive(Deserialize)]
struct RawMessage {
    role: Option<String>,
    content: Option<MessageContent>,
    model: Option<String>,
    usage: Option<TokenUsage>,
}

/// Peer metadata written next to the message when a tool result lands.
/// The shape varies per tool; unknown layouts deserialize to all-None.
#[derive(Deserialize, Default)]
#[serde(default)]
struct ToolUseResultMeta {
    stdout: Option<String>,
    stderr: Option<String>,
    interrupted: Option<bool>,
    #[serde(rename = "isImage")]
    is_image: Option<bool>,
    #[serde(rename = "returnCodeInterpretation")]
    return_code_interpretation: Option<String>,
}

// Some writers emit `toolUseResult` as a bare string (error text). Treat any
// non-object shape as no metadata rather than failing the whole entry.
impl ToolUseResultMeta {
    fn opt_from(value: Option<Value>) -> Option<ToolUseResultMeta> {
        value.and_then(|v| serde_json::from_value(v).ok())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a whole log file's text into surface messages, in file order.
/// Malformed lines (torn appends) are skipped and counted. Deterministic:
/// identical input text yields identical output.
pub fn parse(text: &str) -> ParsedLog {
    let mut out = ParsedLog::default();

    struct Parsed {
        message: Message,
        is_result_carrier: bool,
        results: Vec<EnhancedToolResult>,
    }

    // Pass 1: decode lines, keep user/assistant entries, index tool_use ids.
    let mut entries: Vec<Parsed> = Vec::new();
    let mut tool_use_index: HashMap<String, usize> = HashMap::new();

    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // `toolUseResult` shapes vary wildly; pull it out as a raw value first
        // so an odd layout can't sink the entry.
        let mut raw_value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                out.line_errors += 1;
                continue;
            }
        };
        let peer_meta = ToolUseResultMeta::opt_from(
            raw_value
                .as_object_mut()
                .and_then(|o| o.remove("toolUseResult")),
        );
        let raw: RawEntry = match serde_json::from_value(raw_value) {
            Ok(e) => e,
            Err(_) => {
                out.line_errors += 1;
                continue;
            }
        };

        // Entry type is authoritative; fall back to message.role for writers
        // that omit it.
        let declared = raw
            .entry_type
            .as_deref()
            .or_else(|| raw.message.as_ref().and_then(|m| m.role.as_deref()));
        let role = match declared {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => continue,
        };
        let Some(raw_msg) = raw.message else { continue };

        let content = raw_msg
            .content
            .unwrap_or_else(|| MessageContent::Blocks(Vec::new()));

        let idx = entries.len();
        if role == Role::Assistant {
            for block in content.blocks() {
                if let Some(id) = block.tool_use_id() {
                    tool_use_index.entry(id.to_string()).or_insert(idx);
                }
            }
        }

        let mut results: Vec<EnhancedToolResult> = Vec::new();
        let mut known_blocks = 0usize;
        let mut result_blocks = 0usize;
        if role == Role::User {
            for block in content.blocks() {
                if matches!(block, ContentBlock::Known(_)) {
                    known_blocks += 1;
                }
                if let ContentBlock::Known(BlockPayload::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                    ..
                }) = block
                {
                    result_blocks += 1;
                    let mut enhanced = EnhancedToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                        ..Default::default()
                    };
                    if let Some(meta) = &peer_meta {
                        enhanced.stdout = meta.stdout.clone();
                        enhanced.stderr = meta.stderr.clone();
                        enhanced.interrupted = meta.interrupted;
                        enhanced.is_image = meta.is_image;
                        enhanced.return_code_interpretation =
                            meta.return_code_interpretation.clone();
                    }
                    results.push(enhanced);
                }
            }
        }
        // A carrier holds only tool_result blocks (unknown blocks riding along
        // don't promote it to the surface).
        let is_result_carrier = result_blocks > 0 && result_blocks == known_blocks;

        let uuid = raw.uuid.clone();
        let id = uuid
            .clone()
            .unwrap_or_else(|| format!("line-{}", line_no + 1));

        entries.push(Parsed {
            message: Message {
                id,
                role,
                timestamp: raw.timestamp,
                content,
                model: raw_msg.model,
                usage: raw_msg.usage,
                uuid,
                is_compact_summary: raw.is_compact_summary.unwrap_or(false),
                is_sidechain: raw.is_sidechain.unwrap_or(false),
                tool_results: Vec::new(),
            },
            is_result_carrier,
            results,
        });
    }

    // Pass 2: attach each result to the assistant entry that issued the call.
    // Insertion order is preserved; multiple results per tool_use are kept.
    let mut attachments: Vec<(usize, EnhancedToolResult)> = Vec::new();
    for entry in &entries {
        for result in &entry.results {
            match tool_use_index.get(&result.tool_use_id) {
                Some(&target) => attachments.push((target, result.clone())),
                None => out.orphan_results += 1,
            }
        }
    }
    for (target, result) in attachments {
        entries[target].message.tool_results.push(result);
    }

    // Pass 3: surface sequence — assistants plus non-carrier users.
    out.messages = entries
        .into_iter()
        .filter(|e| e.message.role == Role::Assistant || !e.is_result_carrier)
        .map(|e| e.message)
        .collect();

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant_text(uuid: &str, ts: &str, text: &str) -> String {
        format!(
            r#"{{"type":"assistant","uuid":"{uuid}","timestamp":"{ts}","message":{{"role":"assistant","model":"claude-sonnet-4-6","content":[{{"type":"text","text":"{text}"}}],"usage":{{"input_tokens":10,"output_tokens":5}}}}}}"#
        )
    }

    fn assistant_tool_use(uuid: &str, ts: &str, tool_id: &str) -> String {
        format!(
            r#"{{"type":"assistant","uuid":"{uuid}","timestamp":"{ts}","message":{{"role":"assistant","content":[{{"type":"tool_use","id":"{tool_id}","name":"Bash","input":{{"command":"ls"}}}}]}}}}"#
        )
    }

    fn user_tool_result(uuid: &str, ts: &str, tool_id: &str, stdout: &str) -> String {
        format!(
            r#"{{"type":"user","uuid":"{uuid}","timestamp":"{ts}","toolUseResult":{{"stdout":"{stdout}","stderr":"","interrupted":false}},"message":{{"role":"user","content":[{{"type":"tool_result","tool_use_id":"{tool_id}","content":"{stdout}"}}]}}}}"#
        )
    }

    fn user_prompt(uuid: &str, ts: &str, text: &str) -> String {
        format!(
            r#"{{"type":"user","uuid":"{uuid}","timestamp":"{ts}","message":{{"role":"user","content":"{text}"}}}}"#
        )
    }

    #[test]
    fn empty_input_yields_nothing() {
        let parsed = parse("");
        assert!(parsed.messages.is_empty());
        assert_eq!(parsed.line_errors, 0);
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let text = format!(
            "not json\n{}\n{{torn line",
            assistant_text("a1", "2026-07-01T10:00:00Z", "hi")
        );
        let parsed = parse(&text);
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.line_errors, 2);
    }

    #[test]
    fn only_malformed_lines_yield_empty_output() {
        let parsed = parse("garbage\n{half\n");
        assert!(parsed.messages.is_empty());
        assert_eq!(parsed.line_errors, 2);
    }

    #[test]
    fn non_conversation_entry_types_are_skipped() {
        let text = format!(
            "{}\n{}",
            r#"{"type":"summary","summary":"compacted"}"#,
            assistant_text("a1", "2026-07-01T10:00:00Z", "hi")
        );
        let parsed = parse(&text);
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.line_errors, 0);
    }

    #[test]
    fn tool_result_attaches_to_issuing_assistant() {
        // tool_use, its result, then a closing reply.
        let text = [
            assistant_tool_use("a1", "2026-07-01T10:00:00Z", "t1"),
            user_tool_result("u1", "2026-07-01T10:00:01Z", "t1", "ok"),
            assistant_text("a2", "2026-07-01T10:00:02Z", "done"),
        ]
        .join("\n");
        let parsed = parse(&text);

        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0].uuid.as_deref(), Some("a1"));
        assert_eq!(parsed.messages[0].tool_results.len(), 1);
        let r = &parsed.messages[0].tool_results[0];
        assert_eq!(r.tool_use_id, "t1");
        assert_eq!(r.stdout.as_deref(), Some("ok"));
        assert_eq!(r.interrupted, Some(false));
        assert_eq!(parsed.messages[1].uuid.as_deref(), Some("a2"));
        assert!(!parsed.messages[0].has_unresolved_tool_use());
    }

    #[test]
    fn unresolved_tool_use_stays_in_surface_with_empty_results() {
        let text = assistant_tool_use("a1", "2026-07-01T10:00:00Z", "t9");
        let parsed = parse(&text);
        assert_eq!(parsed.messages.len(), 1);
        assert!(parsed.messages[0].tool_results.is_empty());
        assert_eq!(parsed.messages[0].unresolved_tool_uses(), vec!["t9"]);
    }

    #[test]
    fn orphan_tool_result_is_discarded_and_counted() {
        let text = user_tool_result("u1", "2026-07-01T10:00:00Z", "missing", "x");
        let parsed = parse(&text);
        assert!(parsed.messages.is_empty());
        assert_eq!(parsed.orphan_results, 1);
    }

    #[test]
    fn multiple_results_for_one_tool_use_keep_order() {
        let text = [
            assistant_tool_use("a1", "2026-07-01T10:00:00Z", "t1"),
            user_tool_result("u1", "2026-07-01T10:00:01Z", "t1", "first"),
            user_tool_result("u2", "2026-07-01T10:00:02Z", "t1", "second"),
        ]
        .join("\n");
        let parsed = parse(&text);
        assert_eq!(parsed.messages.len(), 1);
        let results = &parsed.messages[0].tool_results;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].stdout.as_deref(), Some("first"));
        assert_eq!(results[1].stdout.as_deref(), Some("second"));
    }

    #[test]
    fn plain_user_prompts_survive_to_surface() {
        let text = [
            user_prompt("u1", "2026-07-01T10:00:00Z", "hello"),
            assistant_text("a1", "2026-07-01T10:00:01Z", "hi"),
        ]
        .join("\n");
        let parsed = parse(&text);
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0].role, Role::User);
        assert_eq!(
            parsed.messages[0].content,
            MessageContent::Text("hello".into())
        );
    }

    #[test]
    fn mixed_user_entry_keeps_surface_but_still_attaches_result() {
        // A user entry carrying a tool_result *and* a text block (interrupt
        // message) stays visible.
        let text = [
            assistant_tool_use("a1", "2026-07-01T10:00:00Z", "t1"),
            r#"{"type":"user","uuid":"u1","timestamp":"2026-07-01T10:00:01Z","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"out"},{"type":"text","text":"stop doing that"}]}}"#.to_string(),
        ]
        .join("\n");
        let parsed = parse(&text);
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0].tool_results.len(), 1);
        assert_eq!(parsed.messages[1].uuid.as_deref(), Some("u1"));
    }

    #[test]
    fn unknown_blocks_round_trip_verbatim() {
        let text = r#"{"type":"assistant","uuid":"a1","timestamp":"2026-07-01T10:00:00Z","message":{"role":"assistant","content":[{"type":"thinking","thinking":"hmm","signature":"xyz"}]}}"#;
        let parsed = parse(text);
        assert_eq!(parsed.messages.len(), 1);
        let blocks: Vec<_> = parsed.messages[0].content.blocks().collect();
        assert_eq!(blocks.len(), 1);
        match blocks[0] {
            ContentBlock::Unknown(v) => {
                assert_eq!(v["type"], "thinking");
                assert_eq!(v["signature"], "xyz");
            }
            other => panic!("expected unknown block, got {other:?}"),
        }
        // And it survives serialization unchanged.
        let json = serde_json::to_value(&parsed.messages[0].content).unwrap();
        assert_eq!(json[0]["thinking"], "hmm");
    }

    #[test]
    fn unknown_fields_on_known_blocks_are_preserved() {
        let text = r#"{"type":"assistant","uuid":"a1","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{},"caveat":"slow"}]}}"#;
        let parsed = parse(text);
        let json = serde_json::to_value(&parsed.messages[0].content).unwrap();
        assert_eq!(json[0]["caveat"], "slow");
        assert_eq!(json[0]["type"], "tool_use");
    }

    #[test]
    fn missing_uuid_synthesizes_line_fallback() {
        let text = r#"{"type":"assistant","message":{"role":"assistant","content":"ok"}}"#;
        let parsed = parse(text);
        assert_eq!(parsed.messages[0].id, "line-1");
        assert!(parsed.messages[0].uuid.is_none());
    }

    #[test]
    fn parse_is_deterministic() {
        let text = [
            user_prompt("u1", "2026-07-01T10:00:00Z", "hello"),
            assistant_tool_use("a1", "2026-07-01T10:00:01Z", "t1"),
            user_tool_result("u2", "2026-07-01T10:00:02Z", "t1", "ok"),
        ]
        .join("\n");
        let a = parse(&text);
        let b = parse(&text);
        assert_eq!(a.messages, b.messages);
        assert_eq!(a.line_errors, b.line_errors);
    }

    #[test]
    fn string_tool_use_result_does_not_sink_entry() {
        // Some writers put a bare string into toolUseResult.
        let text = [
            assistant_tool_use("a1", "2026-07-01T10:00:00Z", "t1"),
            r#"{"type":"user","uuid":"u1","toolUseResult":"Error: interrupted","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","is_error":true}]}}"#.to_string(),
        ]
        .join("\n");
        let parsed = parse(&text);
        assert_eq!(parsed.line_errors, 0);
        assert_eq!(parsed.messages.len(), 1);
        let r = &parsed.messages[0].tool_results[0];
        assert_eq!(r.is_error, Some(true));
        assert!(r.stdout.is_none());
    }

    #[test]
    fn compact_summary_flag_is_preserved() {
        let text = r#"{"type":"user","uuid":"u1","isCompactSummary":true,"message":{"role":"user","content":"summary of earlier work"}}"#;
        let parsed = parse(text);
        assert!(parsed.messages[0].is_compact_summary);
    }

    #[test]
    fn usage_and_model_carry_through() {
        let parsed = parse(&assistant_text("a1", "2026-07-01T10:00:00Z", "hi"));
        let m = &parsed.messages[0];
        assert_eq!(m.model.as_deref(), Some("claude-sonnet-4-6"));
        let usage = m.usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.cache_read_input_tokens, 0);
    }
}
