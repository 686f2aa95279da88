//! Snapshot assembly: log tree → conversations → projects → aggregates.
//!
//! The analyzer owns the only mutable view of the world. Rebuilds go through
//! `maybe_rebuild`, which coalesces concurrent callers and throttles to one
//! rebuild per interval; readers take the current `Arc<Snapshot>` and never
//! block a rebuild.

use crate::cache::DataCache;
use crate::error::{LookoutError, Result};
use crate::parser::{Message, TokenUsage};
use crate::perf::PerfMonitor;
use crate::process::{self, CorrelationCandidate, ProcessDetector, ProcessInfo};
use crate::state::{self, ConversationState, StateThresholds};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub filepath: PathBuf,
    pub project_path: PathBuf,
    pub session_id: String,
    pub messages: Vec<Message>,
    pub last_modified: DateTime<Utc>,
    pub token_usage: BTreeMap<String, TokenUsage>,
    pub state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_process: Option<ProcessInfo>,
    #[serde(skip)]
    pub project_dir: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StateCounts {
    pub active: usize,
    pub awaiting_user: usize,
    pub idle: usize,
    pub completed: usize,
    pub error: usize,
}

impl StateCounts {
    pub fn record(&mut self, state: ConversationState) {
        match state {
            ConversationState::Active => self.active += 1,
            ConversationState::AwaitingUser => self.awaiting_user += 1,
            ConversationState::Idle => self.idle += 1,
            ConversationState::Completed => self.completed += 1,
            ConversationState::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.active + self.awaiting_user + self.idle + self.completed + self.error
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectRollup {
    pub conversation_count: usize,
    pub counts_by_state: StateCounts,
    pub token_usage: BTreeMap<String, TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub path: PathBuf,
    pub name: String,
    pub conversations: Vec<PathBuf>,
    pub rollup: ProjectRollup,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aggregates {
    pub conversation_count: usize,
    pub counts_by_state: StateCounts,
    pub token_usage: BTreeMap<String, TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    pub live_process_count: usize,
    pub parse_error_lines: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub snapshot_version: u64,
    pub generated_at: DateTime<Utc>,
    pub projects: Vec<Project>,
    pub conversations: Vec<Conversation>,
    pub aggregates: Aggregates,
}

impl Snapshot {
    pub fn conversation(&self, session_id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| c.session_id == session_id || c.filepath.to_string_lossy() == session_id)
    }
}

/// One conversation flipping state between two snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub filepath: PathBuf,
    pub old_state: ConversationState,
    pub new_state: ConversationState,
    pub at: DateTime<Utc>,
}

pub struct ConversationAnalyzer {
    root: PathBuf,
    cache: Arc<DataCache>,
    perf: Arc<PerfMonitor>,
    detector: ProcessDetector,
    thresholds: StateThresholds,
    min_rebuild_interval: Duration,
    version: AtomicU64,
    current: RwLock<Option<Arc<Snapshot>>>,
    rebuild_gate: tokio::sync::Mutex<()>,
    last_built: Mutex<Option<Instant>>,
    cancel: AtomicBool,
    change_tx: Mutex<Option<UnboundedSender<StateChange>>>,
    // per-file parse-failure counts already reported to PerfMonitor
    reported_errors: Mutex<HashMap<PathBuf, (u64, u64)>>,
}

impl ConversationAnalyzer {
    pub fn new(
        root: PathBuf,
        cache: Arc<DataCache>,
        perf: Arc<PerfMonitor>,
        detector: ProcessDetector,
        thresholds: StateThresholds,
    ) -> Self {
        ConversationAnalyzer {
            root,
            cache,
            perf,
            detector,
            thresholds,
            min_rebuild_interval: Duration::from_millis(500),
            version: AtomicU64::new(0),
            current: RwLock::new(None),
            rebuild_gate: tokio::sync::Mutex::new(()),
            last_built: Mutex::new(None),
            cancel: AtomicBool::new(false),
            change_tx: Mutex::new(None),
            reported_errors: Mutex::new(HashMap::new()),
        }
    }

    /// Register the channel that receives state-change diffs on rebuild.
    pub fn set_change_listener(&self, tx: UnboundedSender<StateChange>) {
        *self.change_tx.lock().unwrap() = Some(tx);
    }

    /// Ask in-flight and future rebuilds to stop at the next file boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().unwrap().clone()
    }

    /// Rebuild unless one finished within the throttle interval; concurrent
    /// callers coalesce onto the same rebuild.
    pub async fn maybe_rebuild(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }
        let _gate = self.rebuild_gate.lock().await;
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }
        self.rebuild_locked().await
    }

    /// Unconditional rebuild (still serialized with other rebuilds).
    pub async fn rebuild_snapshot(&self) -> Result<Arc<Snapshot>> {
        let _gate = self.rebuild_gate.lock().await;
        self.rebuild_locked().await
    }

    fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        let built = (*self.last_built.lock().unwrap())?;
        if built.elapsed() < self.min_rebuild_interval {
            self.snapshot()
        } else {
            None
        }
    }

    async fn rebuild_locked(&self) -> Result<Arc<Snapshot>> {
        let started = Instant::now();
        let now = Utc::now();

        std::fs::metadata(&self.root).map_err(|e| {
            self.perf.record_error("SnapshotUnavailable");
            LookoutError::SnapshotUnavailable {
                root: self.root.clone(),
                source: e,
            }
        })?;

        let files = scan_jsonl(&self.root);

        let mut conversations: Vec<Conversation> = Vec::with_capacity(files.len());
        let mut parse_error_lines = 0u64;
        for path in files {
            if self.cancel.load(Ordering::Relaxed) {
                debug!("rebuild cancelled mid-scan");
                break;
            }
            match self.load_conversation(&path) {
                Ok(conversation) => {
                    parse_error_lines += self.report_parse_counters(&path);
                    conversations.push(conversation);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "excluding conversation");
                    self.perf.record_error(e.kind());
                    self.perf.incr("analyzer.files_excluded");
                }
            }
        }

        self.correlate_processes(&mut conversations, now);

        for conversation in &mut conversations {
            conversation.state = state::classify(
                &conversation.messages,
                conversation.last_modified,
                conversation.live_process.is_some(),
                now,
                &self.thresholds,
            );
        }
        conversations.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        let projects = group_projects(&conversations);
        let aggregates = aggregate(&conversations, parse_error_lines);

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(Snapshot {
            snapshot_version: version,
            generated_at: now,
            projects,
            conversations,
            aggregates,
        });

        let previous = self
            .current
            .write()
            .unwrap()
            .replace(snapshot.clone());
        *self.last_built.lock().unwrap() = Some(Instant::now());
        self.perf.record_timing("analyzer.rebuild", started.elapsed());

        self.emit_state_changes(previous.as_deref(), &snapshot, now);
        Ok(snapshot)
    }

    fn load_conversation(&self, path: &Path) -> Result<Conversation> {
        let parsed = self.cache.get_parsed(path)?;
        let stat = self.cache.get_metadata(path)?;
        let last_modified: DateTime<Utc> = stat.mtime.into();

        let project_dir = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let project_path = decode_project_dir(&project_dir)
            .unwrap_or_else(|| path.parent().unwrap_or(Path::new("/")).to_path_buf());
        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Conversation {
            filepath: path.to_path_buf(),
            project_path,
            session_id,
            token_usage: usage_by_model(&parsed.messages),
            messages: parsed.messages.clone(),
            last_modified,
            state: ConversationState::Completed,
            live_process: None,
            project_dir,
        })
    }

    /// Report only the counter growth since the last rebuild, so PerfMonitor
    /// sees each torn line once. Returns the file's current totals for the
    /// aggregate view.
    fn report_parse_counters(&self, path: &Path) -> u64 {
        let parsed = match self.cache.get_parsed(path) {
            Ok(p) => p,
            Err(_) => return 0,
        };
        let mut reported = self.reported_errors.lock().unwrap();
        let (prev_lines, prev_orphans) = reported
            .get(path)
            .copied()
            .unwrap_or((0, 0));
        if parsed.line_errors > prev_lines {
            self.perf
                .add("parser.line_errors", parsed.line_errors - prev_lines);
        }
        if parsed.orphan_results > prev_orphans {
            self.perf
                .add("parser.orphan_results", parsed.orphan_results - prev_orphans);
        }
        reported.insert(
            path.to_path_buf(),
            (parsed.line_errors, parsed.orphan_results),
        );
        parsed.line_errors
    }

    fn correlate_processes(&self, conversations: &mut [Conversation], now: DateTime<Utc>) {
        let started = Instant::now();
        let processes = match self.cache.get_processes(|| self.detector.enumerate()) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "process enumeration failed");
                self.perf.record_error(e.kind());
                return;
            }
        };
        self.perf.record_timing("process.scan", started.elapsed());

        let candidates: Vec<CorrelationCandidate<'_>> = conversations
            .iter()
            .map(|c| CorrelationCandidate {
                filepath: &c.filepath,
                project_dir: &c.project_dir,
                last_modified: c.last_modified,
            })
            .collect();
        let assigned = process::correlate(&candidates, &processes, now);
        drop(candidates);

        for (i, pid) in assigned.into_iter().enumerate() {
            if let Some(pid) = pid {
                if let Some(info) = processes.iter().find(|p| p.pid == pid) {
                    let mut info = info.clone();
                    info.correlated_filepath = Some(conversations[i].filepath.clone());
                    conversations[i].live_process = Some(info);
                }
            }
        }
    }

    fn emit_state_changes(&self, previous: Option<&Snapshot>, next: &Snapshot, now: DateTime<Utc>) {
        let Some(previous) = previous else { return };
        let tx = self.change_tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else { return };

        let old_states: HashMap<&Path, ConversationState> = previous
            .conversations
            .iter()
            .map(|c| (c.filepath.as_path(), c.state))
            .collect();

        for conversation in &next.conversations {
            if let Some(&old) = old_states.get(conversation.filepath.as_path()) {
                if old != conversation.state {
                    let _ = tx.send(StateChange {
                        filepath: conversation.filepath.clone(),
                        old_state: old,
                        new_state: conversation.state,
                        at: now,
                    });
                }
            }
        }
    }
}

/// All `.jsonl` files under the root, depth-first, sorted for determinism.
pub fn scan_jsonl(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "jsonl") {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// Reverse of the dash-flattening the log root applies to project paths.
/// Best effort: separators come back, other flattened punctuation cannot.
fn decode_project_dir(name: &str) -> Option<PathBuf> {
    if name.starts_with('-') {
        Some(PathBuf::from(name.replace('-', "/")))
    } else {
        None
    }
}

fn usage_by_model(messages: &[Message]) -> BTreeMap<String, TokenUsage> {
    let mut by_model: BTreeMap<String, TokenUsage> = BTreeMap::new();
    for message in messages {
        if let Some(usage) = &message.usage {
            let model = message.model.clone().unwrap_or_else(|| "unknown".into());
            by_model.entry(model).or_default().add(usage);
        }
    }
    by_model
}

fn merge_usage(into: &mut BTreeMap<String, TokenUsage>, from: &BTreeMap<String, TokenUsage>) {
    for (model, usage) in from {
        into.entry(model.clone()).or_default().add(usage);
    }
}

fn group_projects(conversations: &[Conversation]) -> Vec<Project> {
    let mut by_dir: BTreeMap<&str, Vec<&Conversation>> = BTreeMap::new();
    for conversation in conversations {
        by_dir
            .entry(conversation.project_dir.as_str())
            .or_default()
            .push(conversation);
    }

    let mut projects: Vec<Project> = by_dir
        .into_values()
        .map(|group| {
            let mut counts = StateCounts::default();
            let mut token_usage = BTreeMap::new();
            let mut last_activity: Option<DateTime<Utc>> = None;
            for c in &group {
                counts.record(c.state);
                merge_usage(&mut token_usage, &c.token_usage);
                last_activity = match last_activity {
                    Some(t) if t >= c.last_modified => Some(t),
                    _ => Some(c.last_modified),
                };
            }
            let path = group[0].project_path.clone();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned());
            Project {
                name,
                conversations: group.iter().map(|c| c.filepath.clone()).collect(),
                rollup: ProjectRollup {
                    conversation_count: group.len(),
                    counts_by_state: counts,
                    token_usage,
                    last_activity,
                },
                path,
            }
        })
        .collect();

    projects.sort_by(|a, b| {
        b.rollup
            .last_activity
            .cmp(&a.rollup.last_activity)
            .then_with(|| a.path.cmp(&b.path))
    });
    projects
}

fn aggregate(conversations: &[Conversation], parse_error_lines: u64) -> Aggregates {
    let mut counts = StateCounts::default();
    let mut token_usage = BTreeMap::new();
    let mut last_activity: Option<DateTime<Utc>> = None;
    let mut live = 0usize;
    for c in conversations {
        counts.record(c.state);
        merge_usage(&mut token_usage, &c.token_usage);
        if c.live_process.is_some() {
            live += 1;
        }
        last_activity = match last_activity {
            Some(t) if t >= c.last_modified => Some(t),
            _ => Some(c.last_modified),
        };
    }
    Aggregates {
        conversation_count: conversations.len(),
        counts_by_state: counts,
        token_usage,
        last_activity,
        live_process_count: live,
        parse_error_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use filetime::FileTime;
    use std::time::SystemTime;

    fn fixture_analyzer(root: &Path) -> ConversationAnalyzer {
        ConversationAnalyzer::new(
            root.to_path_buf(),
            Arc::new(DataCache::new(CacheConfig::default())),
            Arc::new(PerfMonitor::new()),
            // A name no real process carries, so host processes never leak in.
            ProcessDetector::new(vec!["lookout-test-none".into()], Vec::new()),
            StateThresholds::default(),
        )
    }

    fn write_session(root: &Path, project: &str, name: &str, lines: &[String]) -> PathBuf {
        let dir = root.join("projects").join(project);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn set_age(path: &Path, secs_ago: u64) {
        let target = SystemTime::now() - Duration::from_secs(secs_ago);
        filetime::set_file_mtime(path, FileTime::from_system_time(target)).unwrap();
    }

    fn assistant_line(uuid: &str, text: &str) -> String {
        format!(
            r#"{{"type":"assistant","uuid":"{uuid}","timestamp":"2026-07-01T10:00:00Z","message":{{"role":"assistant","model":"claude-sonnet-4-6","content":[{{"type":"text","text":"{text}"}}],"usage":{{"input_tokens":100,"output_tokens":40}}}}}}"#
        )
    }

    fn user_line(uuid: &str, text: &str) -> String {
        format!(
            r#"{{"type":"user","uuid":"{uuid}","timestamp":"2026-07-01T09:59:00Z","message":{{"role":"user","content":"{text}"}}}}"#
        )
    }

    #[tokio::test]
    async fn rebuild_groups_projects_and_counts_states() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_session(
            dir.path(),
            "-root-crate",
            "s1.jsonl",
            &[user_line("u1", "hi"), assistant_line("a1", "hello")],
        );
        set_age(&a, 2); // S1: awaiting_user
        let b = write_session(
            dir.path(),
            "-home-dev-app",
            "s2.jsonl",
            &[assistant_line("a2", "bye")],
        );
        set_age(&b, 7200); // completed

        let analyzer = fixture_analyzer(dir.path());
        let snapshot = analyzer.rebuild_snapshot().await.unwrap();

        assert_eq!(snapshot.snapshot_version, 1);
        assert_eq!(snapshot.conversations.len(), 2);
        assert_eq!(snapshot.projects.len(), 2);
        assert_eq!(snapshot.aggregates.counts_by_state.awaiting_user, 1);
        assert_eq!(snapshot.aggregates.counts_by_state.completed, 1);

        let crate_project = snapshot
            .projects
            .iter()
            .find(|p| p.path == Path::new("/root/crate"))
            .expect("decoded project path");
        assert_eq!(crate_project.name, "crate");
        assert_eq!(crate_project.rollup.conversation_count, 1);

        let usage = snapshot
            .aggregates
            .token_usage
            .get("claude-sonnet-4-6")
            .unwrap();
        assert_eq!(usage.input_tokens, 200);
        assert_eq!(usage.output_tokens, 80);
    }

    #[tokio::test]
    async fn conversation_lookup_by_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_session(
            dir.path(),
            "-root-crate",
            "abc-123.jsonl",
            &[assistant_line("a1", "x")],
        );
        set_age(&path, 2);

        let analyzer = fixture_analyzer(dir.path());
        let snapshot = analyzer.rebuild_snapshot().await.unwrap();
        assert!(snapshot.conversation("abc-123").is_some());
        assert!(snapshot.conversation("missing").is_none());
    }

    #[tokio::test]
    async fn empty_file_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_session(dir.path(), "-root-crate", "empty.jsonl", &[String::new()]);
        set_age(&path, 2);

        let analyzer = fixture_analyzer(dir.path());
        let snapshot = analyzer.rebuild_snapshot().await.unwrap();
        assert_eq!(snapshot.conversations.len(), 1);
        assert_eq!(
            snapshot.conversations[0].state,
            ConversationState::Completed
        );
        assert!(snapshot.conversations[0].messages.is_empty());
    }

    #[tokio::test]
    async fn version_is_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-root-crate",
            "s.jsonl",
            &[assistant_line("a1", "x")],
        );
        let analyzer = fixture_analyzer(dir.path());

        let v1 = analyzer.rebuild_snapshot().await.unwrap().snapshot_version;
        let v2 = analyzer.rebuild_snapshot().await.unwrap().snapshot_version;
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn maybe_rebuild_throttles() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-root-crate",
            "s.jsonl",
            &[assistant_line("a1", "x")],
        );
        let analyzer = fixture_analyzer(dir.path());

        let v1 = analyzer.maybe_rebuild().await.unwrap().snapshot_version;
        let v2 = analyzer.maybe_rebuild().await.unwrap().snapshot_version;
        assert_eq!(v1, v2, "second call inside the throttle reuses the snapshot");
    }

    #[tokio::test]
    async fn missing_root_is_snapshot_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nope");
        let analyzer = fixture_analyzer(&root);
        let err = analyzer.rebuild_snapshot().await.unwrap_err();
        assert_eq!(err.kind(), "SnapshotUnavailable");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_file_is_excluded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_session(
            dir.path(),
            "-root-crate",
            "good.jsonl",
            &[assistant_line("a1", "x")],
        );
        // A dangling symlink scans as a .jsonl file but cannot be read.
        std::os::unix::fs::symlink(
            dir.path().join("projects/-root-crate/missing-target"),
            dir.path().join("projects/-root-crate/gone.jsonl"),
        )
        .unwrap();

        let analyzer = fixture_analyzer(dir.path());
        let snapshot = analyzer.rebuild_snapshot().await.unwrap();
        assert_eq!(snapshot.conversations.len(), 1);
        assert_eq!(analyzer.perf.counter("analyzer.files_excluded"), 1);
        assert_eq!(analyzer.perf.counter("errors.FileUnavailable"), 1);
    }

    #[tokio::test]
    async fn state_changes_are_emitted_on_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_session(
            dir.path(),
            "-root-crate",
            "s.jsonl",
            &[assistant_line("a1", "x")],
        );
        set_age(&path, 300); // idle

        let analyzer = fixture_analyzer(dir.path());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        analyzer.set_change_listener(tx);

        analyzer.rebuild_snapshot().await.unwrap();
        set_age(&path, 2); // now awaiting_user
        analyzer.cache.invalidate_file(&path);
        analyzer.rebuild_snapshot().await.unwrap();

        let change = rx.try_recv().expect("one state change");
        assert_eq!(change.old_state, ConversationState::Idle);
        assert_eq!(change.new_state, ConversationState::AwaitingUser);
        assert_eq!(change.filepath, path);
    }

    #[tokio::test]
    async fn parse_errors_reported_once_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_session(
            dir.path(),
            "-root-crate",
            "torn.jsonl",
            &[assistant_line("a1", "x"), "{torn".to_string()],
        );
        set_age(&path, 2);

        let analyzer = fixture_analyzer(dir.path());
        analyzer.rebuild_snapshot().await.unwrap();
        assert_eq!(analyzer.perf.counter("parser.line_errors"), 1);

        analyzer.rebuild_snapshot().await.unwrap();
        assert_eq!(analyzer.perf.counter("parser.line_errors"), 1);
    }

    #[test]
    fn scan_finds_nested_jsonl_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("projects/-b")).unwrap();
        std::fs::create_dir_all(dir.path().join("projects/-a")).unwrap();
        std::fs::write(dir.path().join("projects/-b/z.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("projects/-a/a.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("projects/-a/notes.txt"), "").unwrap();

        let files = scan_jsonl(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("projects/-a/a.jsonl"));
        assert!(files[1].ends_with("projects/-b/z.jsonl"));
    }

    #[test]
    fn decode_round_trips_simple_paths() {
        assert_eq!(
            decode_project_dir("-root-crate"),
            Some(PathBuf::from("/root/crate"))
        );
        assert_eq!(decode_project_dir("plain"), None);
    }
}
