//! Counters, rolling timings, and the health summary behind `/api/health`.
//!
//! Counters are plain atomics so hot paths never block; the rolling windows
//! sit behind a mutex with short critical sections.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

const ERROR_WINDOW: Duration = Duration::from_secs(300);
const TIMING_WINDOW: Duration = Duration::from_secs(300);
const TIMING_CAP: usize = 256;

pub struct PerfMonitor {
    started: Instant,
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    timings: Mutex<HashMap<String, VecDeque<(Instant, f64)>>>,
    errors: Mutex<VecDeque<Instant>>,
    degraded: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimingStats {
    pub count: usize,
    pub p50_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub uptime_sec: u64,
    pub memory_mb: f64,
    pub cache_hit_rate: f64,
    pub errors_last_5m: u64,
    pub degraded: bool,
    pub counters: BTreeMap<String, u64>,
    pub timings: BTreeMap<String, TimingStats>,
}

impl Default for PerfMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfMonitor {
    pub fn new() -> Self {
        PerfMonitor {
            started: Instant::now(),
            counters: RwLock::new(HashMap::new()),
            timings: Mutex::new(HashMap::new()),
            errors: Mutex::new(VecDeque::new()),
            degraded: AtomicBool::new(false),
        }
    }

    fn counter_handle(&self, name: &str) -> Arc<AtomicU64> {
        if let Some(c) = self.counters.read().unwrap().get(name) {
            return c.clone();
        }
        let mut map = self.counters.write().unwrap();
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }

    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, n: u64) {
        self.counter_handle(name).fetch_add(n, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record one error occurrence (any kind) for the 5-minute window, and
    /// bump the per-kind counter.
    pub fn record_error(&self, kind: &str) {
        self.add(&format!("errors.{kind}"), 1);
        let mut errors = self.errors.lock().unwrap();
        let now = Instant::now();
        errors.push_back(now);
        while errors
            .front()
            .is_some_and(|t| now.duration_since(*t) > ERROR_WINDOW)
        {
            errors.pop_front();
        }
    }

    pub fn errors_last_5m(&self) -> u64 {
        let mut errors = self.errors.lock().unwrap();
        let now = Instant::now();
        while errors
            .front()
            .is_some_and(|t| now.duration_since(*t) > ERROR_WINDOW)
        {
            errors.pop_front();
        }
        errors.len() as u64
    }

    pub fn record_timing(&self, name: &str, elapsed: Duration) {
        let mut timings = self.timings.lock().unwrap();
        let window = timings.entry(name.to_string()).or_default();
        let now = Instant::now();
        window.push_back((now, elapsed.as_secs_f64() * 1000.0));
        while window.len() > TIMING_CAP
            || window
                .front()
                .is_some_and(|(t, _)| now.duration_since(*t) > TIMING_WINDOW)
        {
            window.pop_front();
        }
    }

    /// Mark the server as producing partial data (e.g. the watcher died).
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Relaxed);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn summary(&self, cache_hit_rate: f64) -> HealthSummary {
        let counters = self
            .counters
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        let timings = self
            .timings
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, w)| !w.is_empty())
            .map(|(k, w)| {
                let mut values: Vec<f64> = w.iter().map(|(_, ms)| *ms).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                let stats = TimingStats {
                    count: values.len(),
                    p50_ms: values[values.len() / 2],
                    max_ms: *values.last().unwrap(),
                };
                (k.clone(), stats)
            })
            .collect();

        HealthSummary {
            uptime_sec: self.started.elapsed().as_secs(),
            memory_mb: self_memory_mb().unwrap_or(0.0),
            cache_hit_rate,
            errors_last_5m: self.errors_last_5m(),
            degraded: self.is_degraded(),
            counters,
            timings,
        }
    }
}

fn self_memory_mb() -> Option<f64> {
    use sysinfo::{ProcessesToUpdate, System};
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
}
