//! Host process detection and conversation correlation.
//!
//! Enumerates processes that look like the assistant CLI and pairs them with
//! conversation logs. Fields that a platform cannot provide stay empty; the
//! correlator works with whatever survives.

use crate::error::{LookoutError, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How recently a conversation must have been touched for the recency
/// fallback to hand it a process.
const RECENCY_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub command_line: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlated_filepath: Option<PathBuf>,
}

pub struct ProcessDetector {
    /// Substrings matched against the process name (case-insensitive).
    command_names: Vec<String>,
    /// Optional substrings matched against the full command line.
    cmdline_hints: Vec<String>,
}

impl Default for ProcessDetector {
    fn default() -> Self {
        ProcessDetector {
            command_names: vec!["claude".to_string()],
            cmdline_hints: Vec::new(),
        }
    }
}

impl ProcessDetector {
    pub fn new(command_names: Vec<String>, cmdline_hints: Vec<String>) -> Self {
        ProcessDetector {
            command_names,
            cmdline_hints,
        }
    }

    /// Scan the process table for assistant CLI candidates. Callers go
    /// through `DataCache::get_processes` so this runs at most twice a
    /// second.
    pub fn enumerate(&self) -> Result<Vec<ProcessInfo>> {
        use sysinfo::{ProcessesToUpdate, System};

        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let own_pid = sysinfo::get_current_pid()
            .map_err(|e| LookoutError::ProcessEnumerationFailed(e.to_string()))?;

        let mut found: Vec<ProcessInfo> = sys
            .processes()
            .iter()
            .filter(|(pid, _)| **pid != own_pid)
            .filter_map(|(pid, proc)| {
                let name = proc.name().to_string_lossy().to_lowercase();
                let command_line = proc
                    .cmd()
                    .iter()
                    .map(|a| a.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");

                let name_match = self.command_names.iter().any(|n| name.contains(n.as_str()));
                let hint_match = self
                    .cmdline_hints
                    .iter()
                    .any(|h| command_line.contains(h.as_str()));
                if !name_match && !hint_match {
                    return None;
                }

                let started_at = match proc.start_time() {
                    0 => None,
                    secs => Utc.timestamp_opt(secs as i64, 0).single(),
                };

                Some(ProcessInfo {
                    pid: pid.as_u32(),
                    command_line,
                    started_at,
                    cwd: proc.cwd().map(Path::to_path_buf),
                    correlated_filepath: None,
                })
            })
            .filter(|p| is_alive(p.pid))
            .collect();

        found.sort_by_key(|p| p.pid);
        Ok(found)
    }
}

/// Signal-0 probe on Unix; elsewhere trust the enumeration.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    true
}

/// Flatten an absolute path into the directory name the log root uses for
/// the project: every non-alphanumeric character becomes a dash.
pub fn encode_project_dir(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// One conversation's correlation-relevant view.
pub struct CorrelationCandidate<'a> {
    pub filepath: &'a Path,
    /// Encoded project directory name (the parent dir of the log file).
    pub project_dir: &'a str,
    pub last_modified: DateTime<Utc>,
}

/// Pair processes with conversations. For each process the first rule that
/// matches wins: working directory encoding to the project dir, command line
/// embedding the log path, then most-recent activity. Each side is claimed
/// at most once; ties go to the most recently modified conversation.
///
/// Returns, per candidate index, the pid of its matched process.
pub fn correlate(
    candidates: &[CorrelationCandidate<'_>],
    processes: &[ProcessInfo],
    now: DateTime<Utc>,
) -> Vec<Option<u32>> {
    let mut assigned: Vec<Option<u32>> = vec![None; candidates.len()];
    let mut claimed = vec![false; candidates.len()];

    // Freshest conversations first so ties resolve toward recent activity.
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| candidates[*b].last_modified.cmp(&candidates[*a].last_modified));

    for process in processes {
        let chosen = pick_by_cwd(candidates, &claimed, &order, process)
            .or_else(|| pick_by_cmdline(candidates, &claimed, &order, process))
            .or_else(|| pick_by_recency(candidates, &claimed, &order, now));

        if let Some(idx) = chosen {
            assigned[idx] = Some(process.pid);
            claimed[idx] = true;
        }
    }

    assigned
}

fn pick_by_cwd(
    candidates: &[CorrelationCandidate<'_>],
    claimed: &[bool],
    order: &[usize],
    process: &ProcessInfo,
) -> Option<usize> {
    let cwd = process.cwd.as_deref()?;
    let slug = encode_project_dir(cwd);
    order
        .iter()
        .copied()
        .find(|&i| !claimed[i] && candidates[i].project_dir == slug)
}

fn pick_by_cmdline(
    candidates: &[CorrelationCandidate<'_>],
    claimed: &[bool],
    order: &[usize],
    process: &ProcessInfo,
) -> Option<usize> {
    if process.command_line.is_empty() {
        return None;
    }
    order.iter().copied().find(|&i| {
        !claimed[i]
            && process
                .command_line
                .contains(&*candidates[i].filepath.to_string_lossy())
    })
}

fn pick_by_recency(
    candidates: &[CorrelationCandidate<'_>],
    claimed: &[bool],
    order: &[usize],
    now: DateTime<Utc>,
) -> Option<usize> {
    let cutoff = now - ChronoDuration::seconds(RECENCY_WINDOW_SECS);
    order
        .iter()
        .copied()
        .find(|&i| !claimed[i] && candidates[i].last_modified >= cutoff)
}
