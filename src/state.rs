//! Conversation state classification.
//!
//! Pure functions: state is determined entirely by the message sequence, the
//! file mtime, and whether a live assistant process is attached. The first
//! matching rule wins; thresholds are injected so deployments (and tests)
//! can tune them.

use crate::parser::{Message, Role};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Active,
    AwaitingUser,
    Idle,
    Completed,
    Error,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Active => "active",
            ConversationState::AwaitingUser => "awaiting_user",
            ConversationState::Idle => "idle",
            ConversationState::Completed => "completed",
            ConversationState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StateThresholds {
    /// Window for a failing tool result to flag the conversation as `error`.
    pub error_window: Duration,
    /// How fresh the file must be for a live process to count as `active`.
    pub active_window: Duration,
    /// How long an unanswered assistant message counts as `awaiting_user`.
    pub awaiting_window: Duration,
    /// Inactivity horizon separating `idle` from `completed`.
    pub idle_window: Duration,
}

impl Default for StateThresholds {
    fn default() -> Self {
        StateThresholds {
            error_window: Duration::from_secs(30),
            active_window: Duration::from_secs(5),
            awaiting_window: Duration::from_secs(60),
            idle_window: Duration::from_secs(600),
        }
    }
}

fn age_of(last_modified: DateTime<Utc>, now: DateTime<Utc>) -> ChronoDuration {
    (now - last_modified).max(ChronoDuration::zero())
}

fn within(age: ChronoDuration, window: Duration) -> bool {
    // Thresholds are inclusive of the lower (fresher) state.
    age.num_milliseconds() as u128 <= window.as_millis()
}

/// Full classification, rules 1–6 in order.
pub fn classify(
    messages: &[Message],
    last_modified: DateTime<Utc>,
    has_live_process: bool,
    now: DateTime<Utc>,
    thresholds: &StateThresholds,
) -> ConversationState {
    if messages.is_empty() {
        return ConversationState::Completed;
    }

    // Rule 1: a recent failing tool result with no assistant reply after it.
    let error_cutoff = now
        - ChronoDuration::from_std(thresholds.error_window).unwrap_or(ChronoDuration::seconds(30));
    for (i, message) in messages.iter().enumerate() {
        let recent = message.timestamp.is_some_and(|ts| ts >= error_cutoff);
        if recent && message.tool_results.iter().any(|r| r.is_failure()) {
            let answered = messages[i + 1..].iter().any(|m| m.role == Role::Assistant);
            if !answered {
                return ConversationState::Error;
            }
        }
    }

    let last = messages.last().expect("non-empty");
    let age = age_of(last_modified, now);

    // Rule 2: live process still working through a tool call.
    if has_live_process && last.role == Role::Assistant && last.has_unresolved_tool_use() {
        return ConversationState::Active;
    }

    // Rule 3: live process, assistant spoke last, file still warm.
    if has_live_process
        && last.role == Role::Assistant
        && !last.has_unresolved_tool_use()
        && within(age, thresholds.active_window)
    {
        return ConversationState::Active;
    }

    // Rule 4: assistant spoke last and the user hasn't replied yet.
    if last.role == Role::Assistant && within(age, thresholds.awaiting_window) {
        return ConversationState::AwaitingUser;
    }

    // Rules 5–6: recency only.
    if within(age, thresholds.idle_window) {
        ConversationState::Idle
    } else {
        ConversationState::Completed
    }
}

/// Recency-only classification (rules 3–6) for callers that don't have the
/// message list at hand.
pub fn quick_classify(
    last_modified: DateTime<Utc>,
    has_live_process: bool,
    now: DateTime<Utc>,
    thresholds: &StateThresholds,
) -> ConversationState {
    let age = age_of(last_modified, now);
    if has_live_process && within(age, thresholds.active_window) {
        ConversationState::Active
    } else if within(age, thresholds.awaiting_window) {
        ConversationState::AwaitingUser
    } else if within(age, thresholds.idle_window) {
        ConversationState::Idle
    } else {
        ConversationState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{EnhancedToolResult, MessageContent};

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        rfc3339.parse().unwrap()
    }

    fn text_message(role: Role, stamp: &str, text: &str) -> Message {
        Message {
            id: format!("{role:?}-{stamp}"),
            role,
            timestamp: Some(ts(stamp)),
            content: MessageContent::Text(text.to_string()),
            model: None,
            usage: None,
            uuid: None,
            is_compact_summary: false,
            is_sidechain: false,
            tool_results: Vec::new(),
        }
    }

    fn tool_use_message(stamp: &str, tool_id: &str) -> Message {
        let block = serde_json::from_value(serde_json::json!([
            {"type": "tool_use", "id": tool_id, "name": "Bash", "input": {}}
        ]))
        .unwrap();
        Message {
            content: block,
            ..text_message(Role::Assistant, stamp, "")
        }
    }

    fn failing_result(tool_id: &str) -> EnhancedToolResult {
        EnhancedToolResult {
            tool_use_id: tool_id.to_string(),
            stderr: Some("boom".to_string()),
            ..Default::default()
        }
    }

    const NOW: &str = "2026-07-01T12:00:00Z";
    const DEFAULTS: StateThresholds = StateThresholds {
        error_window: Duration::from_secs(30),
        active_window: Duration::from_secs(5),
        awaiting_window: Duration::from_secs(60),
        idle_window: Duration::from_secs(600),
    };

    #[test]
    fn empty_conversation_is_completed() {
        let state = classify(&[], ts(NOW), false, ts(NOW), &DEFAULTS);
        assert_eq!(state, ConversationState::Completed);
    }

    #[test]
    fn assistant_reply_two_seconds_ago_awaits_user() {
        // Fresh assistant reply, nobody typing back yet.
        let messages = vec![text_message(Role::Assistant, "2026-07-01T11:59:58Z", "done")];
        let state = classify(
            &messages,
            ts("2026-07-01T11:59:58Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::AwaitingUser);
    }

    #[test]
    fn live_process_with_unresolved_tool_use_is_active() {
        // A live CLI mid-tool-call is working, not waiting.
        let messages = vec![tool_use_message("2026-07-01T11:59:57Z", "t1")];
        let state = classify(
            &messages,
            ts("2026-07-01T11:59:57Z"),
            true,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::Active);
    }

    #[test]
    fn unresolved_tool_use_without_process_is_not_active() {
        let messages = vec![tool_use_message("2026-07-01T11:59:57Z", "t1")];
        let state = classify(
            &messages,
            ts("2026-07-01T11:59:57Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::AwaitingUser);
    }

    #[test]
    fn live_process_with_warm_file_is_active() {
        let messages = vec![text_message(Role::Assistant, "2026-07-01T11:59:57Z", "ok")];
        let state = classify(
            &messages,
            ts("2026-07-01T11:59:57Z"),
            true,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::Active);
    }

    #[test]
    fn recent_failing_tool_result_is_error() {
        let mut m = tool_use_message("2026-07-01T11:59:50Z", "t1");
        m.tool_results.push(failing_result("t1"));
        let state = classify(
            &[m],
            ts("2026-07-01T11:59:50Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::Error);
    }

    #[test]
    fn failing_result_answered_by_assistant_is_not_error() {
        let mut m = tool_use_message("2026-07-01T11:59:50Z", "t1");
        m.tool_results.push(failing_result("t1"));
        let messages = vec![
            m,
            text_message(Role::Assistant, "2026-07-01T11:59:55Z", "recovered"),
        ];
        let state = classify(
            &messages,
            ts("2026-07-01T11:59:55Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::AwaitingUser);
    }

    #[test]
    fn old_failing_result_is_outside_error_window() {
        let mut m = tool_use_message("2026-07-01T11:58:00Z", "t1");
        m.tool_results.push(failing_result("t1"));
        let state = classify(
            &[m],
            ts("2026-07-01T11:58:00Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        // 2 minutes old: falls through to idle.
        assert_eq!(state, ConversationState::Idle);
    }

    #[test]
    fn interrupted_counts_as_failure() {
        let result = EnhancedToolResult {
            tool_use_id: "t1".into(),
            interrupted: Some(true),
            ..Default::default()
        };
        assert!(result.is_failure());
        let blank = EnhancedToolResult {
            tool_use_id: "t1".into(),
            stderr: Some("   ".into()),
            ..Default::default()
        };
        assert!(!blank.is_failure());
    }

    #[test]
    fn user_spoke_last_recent_is_idle() {
        let messages = vec![text_message(Role::User, "2026-07-01T11:59:30Z", "hey")];
        let state = classify(
            &messages,
            ts("2026-07-01T11:59:30Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::Idle);
    }

    #[test]
    fn stale_conversation_is_completed() {
        let messages = vec![text_message(Role::Assistant, "2026-07-01T10:00:00Z", "bye")];
        let state = classify(
            &messages,
            ts("2026-07-01T10:00:00Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::Completed);
    }

    #[test]
    fn thresholds_are_inclusive_of_the_fresher_state() {
        let asst = |stamp: &str| vec![text_message(Role::Assistant, stamp, "x")];

        // Exactly 5s with a live process: still active (rule 3).
        let state = classify(
            &asst("2026-07-01T11:59:55Z"),
            ts("2026-07-01T11:59:55Z"),
            true,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::Active);

        // Exactly 60s: still awaiting_user (rule 4).
        let state = classify(
            &asst("2026-07-01T11:59:00Z"),
            ts("2026-07-01T11:59:00Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::AwaitingUser);

        // Exactly 600s: still idle (rule 5).
        let state = classify(
            &asst("2026-07-01T11:50:00Z"),
            ts("2026-07-01T11:50:00Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::Idle);

        // One second past 600s: completed.
        let state = classify(
            &asst("2026-07-01T11:49:59Z"),
            ts("2026-07-01T11:49:59Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(state, ConversationState::Completed);
    }

    #[test]
    fn classify_is_pure() {
        let messages = vec![text_message(Role::Assistant, "2026-07-01T11:59:58Z", "x")];
        let a = classify(
            &messages,
            ts("2026-07-01T11:59:58Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        let b = classify(
            &messages,
            ts("2026-07-01T11:59:58Z"),
            false,
            ts(NOW),
            &DEFAULTS,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn quick_classify_covers_rules_three_to_six() {
        let t = &DEFAULTS;
        let now = ts(NOW);
        assert_eq!(
            quick_classify(ts("2026-07-01T11:59:58Z"), true, now, t),
            ConversationState::Active
        );
        assert_eq!(
            quick_classify(ts("2026-07-01T11:59:58Z"), false, now, t),
            ConversationState::AwaitingUser
        );
        assert_eq!(
            quick_classify(ts("2026-07-01T11:55:00Z"), false, now, t),
            ConversationState::Idle
        );
        assert_eq!(
            quick_classify(ts("2026-07-01T09:00:00Z"), true, now, t),
            ConversationState::Completed
        );
    }

    #[test]
    fn state_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConversationState::AwaitingUser).unwrap(),
            "\"awaiting_user\""
        );
        assert_eq!(ConversationState::Error.as_str(), "error");
    }
}
