//! Script fault containment: counting, deduplicated reporting, and the
//! circuit breaker that force-disables chronically failing scripts.
//!
//! The handler never unloads anything itself; it records, rate-limits, and
//! returns a [`FaultDecision`] that tells the registry when a script has
//! crossed the error threshold.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, warn};

use crate::config::LimitsConfig;
use crate::host::snapshot::Vec3;

/// Classification of a script fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Source rejected before the script reached Loaded.
    Syntax,
    /// Error raised during a hook invocation.
    Runtime,
    /// Hook exceeded its wall-clock budget.
    Timeout,
    /// Hook exceeded its memory budget.
    ResourceExceeded,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Runtime => "runtime error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceExceeded => "resource exceeded",
        };
        f.write_str(s)
    }
}

/// Best-effort source location extracted from an interpreter error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Chunk name, normally the script name.
    pub chunk: String,
    /// Line number within the chunk.
    pub line: u32,
}

/// Parse a location out of a Lua error message such as
/// `[string "miner"]:3: attempt to index a nil value`.
pub fn parse_location(message: &str) -> Option<SourceLocation> {
    let start = message.find("[string \"")? + "[string \"".len();
    let rest = &message[start..];
    let end = rest.find("\"]:")?;
    let chunk = rest[..end].to_string();

    let after = &rest[end + "\"]:".len()..];
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    let line = digits.parse().ok()?;

    Some(SourceLocation { chunk, line })
}

/// Host state captured alongside the first report of an error kind.
#[derive(Debug, Clone, Default)]
pub struct HostStateSnapshot {
    /// Player health at report time.
    pub player_health: f64,
    /// Player maximum health.
    pub player_max_health: f64,
    /// Player position.
    pub player_position: Vec3,
    /// Script VM memory in bytes.
    pub vm_memory: usize,
    /// Number of scripts currently registered.
    pub loaded_scripts: usize,
    /// Name of the reporting thread.
    pub thread: String,
}

/// One recorded script fault. Immutable once created.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Global sequence number.
    pub seq: u64,
    /// Script name.
    pub script: String,
    /// Call context, normally the hook name.
    pub context: String,
    /// Fault classification.
    pub kind: ErrorKind,
    /// Error message.
    pub message: String,
    /// Best-effort source location.
    pub location: Option<SourceLocation>,
    /// Report timestamp.
    pub timestamp: DateTime<Utc>,
    /// Host state at report time.
    pub snapshot: HostStateSnapshot,
}

/// What the registry should do after a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultDecision {
    /// Recorded and logged in full.
    Logged,
    /// Recorded; log output suppressed by the dedup window.
    Suppressed,
    /// The script crossed the error threshold and must be forced to Faulted.
    Tripped,
}

#[derive(Debug)]
struct DedupWindow {
    since: DateTime<Utc>,
    suppressed: u32,
}

#[derive(Debug, Default)]
struct HandlerState {
    counts: HashMap<String, u32>,
    tripped: HashSet<String>,
    windows: HashMap<(String, ErrorKind), DedupWindow>,
    ring: VecDeque<ErrorRecord>,
    next_seq: u64,
}

/// Deduplicated, rate-limited script error reporting with circuit breaking.
#[derive(Debug)]
pub struct ErrorHandler {
    max_errors: u32,
    dedup_window: ChronoDuration,
    ring_capacity: usize,
    retention: ChronoDuration,
    state: Mutex<HandlerState>,
}

impl ErrorHandler {
    /// Create a handler from configured limits.
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_errors: limits.max_errors_per_script,
            dedup_window: ChronoDuration::seconds(limits.dedup_window_secs as i64),
            ring_capacity: limits.error_ring_capacity,
            retention: ChronoDuration::seconds(limits.error_retention_secs as i64),
            state: Mutex::new(HandlerState::default()),
        }
    }

    /// Record a script fault.
    ///
    /// The first occurrence of a `(script, kind)` pair is logged in full with
    /// location and host state; repeats inside the cool-down window are
    /// suppressed and surface later as an occurrence-count summary. Syntax
    /// errors are recorded but never counted toward the breaker threshold,
    /// since a script rejected at load never runs.
    pub fn report(
        &self,
        script: &str,
        context: &str,
        kind: ErrorKind,
        message: &str,
        snapshot: HostStateSnapshot,
    ) -> FaultDecision {
        let now = Utc::now();
        let mut state = self.lock();

        state.next_seq += 1;
        let record = ErrorRecord {
            seq: state.next_seq,
            script: script.to_string(),
            context: context.to_string(),
            kind,
            message: message.to_string(),
            location: parse_location(message),
            timestamp: now,
            snapshot,
        };

        let suppressed = self.dedup(&mut state, &record, now);

        if self.ring_capacity > 0 {
            while state.ring.len() >= self.ring_capacity {
                state.ring.pop_front();
            }
            state.ring.push_back(record);
        }

        if kind == ErrorKind::Syntax {
            return if suppressed {
                FaultDecision::Suppressed
            } else {
                FaultDecision::Logged
            };
        }

        let count = {
            let entry = state.counts.entry(script.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        if count >= self.max_errors && state.tripped.insert(script.to_string()) {
            error!(
                script,
                count, "script force-disabled after repeated errors; reload required"
            );
            return FaultDecision::Tripped;
        }

        if suppressed {
            FaultDecision::Suppressed
        } else {
            FaultDecision::Logged
        }
    }

    /// Apply the dedup window and emit log output. Returns true when the full
    /// report was suppressed.
    fn dedup(&self, state: &mut HandlerState, record: &ErrorRecord, now: DateTime<Utc>) -> bool {
        let key = (record.script.clone(), record.kind);

        if let Some(window) = state.windows.get_mut(&key) {
            if now - window.since <= self.dedup_window {
                window.suppressed += 1;
                return true;
            }
            // Window expired: summarize what was suppressed, then report in
            // full again below.
            if window.suppressed > 0 {
                warn!(
                    script = %record.script,
                    kind = %record.kind,
                    occurrences = window.suppressed,
                    window_secs = self.dedup_window.num_seconds(),
                    "further occurrences in the last window"
                );
            }
        }

        state.windows.insert(
            key,
            DedupWindow {
                since: now,
                suppressed: 0,
            },
        );

        match &record.location {
            Some(location) => error!(
                script = %record.script,
                context = %record.context,
                kind = %record.kind,
                line = location.line,
                player_health = record.snapshot.player_health,
                vm_memory = record.snapshot.vm_memory,
                loaded_scripts = record.snapshot.loaded_scripts,
                thread = %record.snapshot.thread,
                "script fault: {}",
                record.message
            ),
            None => error!(
                script = %record.script,
                context = %record.context,
                kind = %record.kind,
                player_health = record.snapshot.player_health,
                vm_memory = record.snapshot.vm_memory,
                loaded_scripts = record.snapshot.loaded_scripts,
                thread = %record.snapshot.thread,
                "script fault: {}",
                record.message
            ),
        }
        false
    }

    /// Reset a script's error state. Invoked only by a reload.
    pub fn reset(&self, script: &str) {
        let mut state = self.lock();
        state.counts.remove(script);
        state.tripped.remove(script);
        state.windows.retain(|(name, _), _| name != script);
    }

    /// Current error count for a script.
    pub fn error_count(&self, script: &str) -> u32 {
        self.lock().counts.get(script).copied().unwrap_or(0)
    }

    /// Recent records for one script, oldest first.
    pub fn recent_errors(&self, script: &str) -> Vec<ErrorRecord> {
        self.lock()
            .ring
            .iter()
            .filter(|r| r.script == script)
            .cloned()
            .collect()
    }

    /// All recent records, oldest first.
    pub fn all_recent_errors(&self) -> Vec<ErrorRecord> {
        self.lock().ring.iter().cloned().collect()
    }

    /// Evict records older than the retention period. Returns the number
    /// evicted.
    pub fn clear_old_errors(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let mut state = self.lock();

        let before = state.ring.len();
        state.ring.retain(|r| r.timestamp > cutoff);
        state.windows.retain(|_, w| w.since > cutoff);
        before - state.ring.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandlerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(max_errors: u32) -> ErrorHandler {
        ErrorHandler::new(&LimitsConfig {
            max_errors_per_script: max_errors,
            ..Default::default()
        })
    }

    fn report(h: &ErrorHandler, script: &str, kind: ErrorKind, message: &str) -> FaultDecision {
        h.report(script, "on_tick", kind, message, HostStateSnapshot::default())
    }

    #[test]
    fn test_count_increments() {
        let h = handler(10);
        assert_eq!(h.error_count("miner"), 0);

        report(&h, "miner", ErrorKind::Runtime, "boom");
        report(&h, "miner", ErrorKind::Runtime, "boom");

        assert_eq!(h.error_count("miner"), 2);
        assert_eq!(h.error_count("fisher"), 0);
    }

    #[test]
    fn test_trips_at_threshold_exactly_once() {
        let h = handler(3);

        assert_eq!(
            report(&h, "miner", ErrorKind::Runtime, "boom"),
            FaultDecision::Logged
        );
        assert_eq!(
            report(&h, "miner", ErrorKind::Runtime, "boom"),
            FaultDecision::Suppressed
        );
        assert_eq!(
            report(&h, "miner", ErrorKind::Runtime, "boom"),
            FaultDecision::Tripped
        );

        // Already tripped: no second Tripped decision
        assert_ne!(
            report(&h, "miner", ErrorKind::Runtime, "boom"),
            FaultDecision::Tripped
        );
    }

    #[test]
    fn test_dedup_suppresses_same_kind() {
        let h = handler(100);

        assert_eq!(
            report(&h, "miner", ErrorKind::Runtime, "boom"),
            FaultDecision::Logged
        );
        assert_eq!(
            report(&h, "miner", ErrorKind::Runtime, "boom again"),
            FaultDecision::Suppressed
        );

        // A different kind gets its own window
        assert_eq!(
            report(&h, "miner", ErrorKind::Timeout, "too slow"),
            FaultDecision::Logged
        );

        // Another script is independent
        assert_eq!(
            report(&h, "fisher", ErrorKind::Runtime, "boom"),
            FaultDecision::Logged
        );
    }

    #[test]
    fn test_timeouts_count_like_runtime_errors() {
        let h = handler(2);

        report(&h, "miner", ErrorKind::Timeout, "too slow");
        assert_eq!(
            report(&h, "miner", ErrorKind::ResourceExceeded, "too big"),
            FaultDecision::Tripped
        );
    }

    #[test]
    fn test_syntax_errors_not_counted() {
        let h = handler(2);

        report(&h, "miner", ErrorKind::Syntax, "unexpected symbol");
        report(&h, "miner", ErrorKind::Syntax, "unexpected symbol");
        report(&h, "miner", ErrorKind::Syntax, "unexpected symbol");

        assert_eq!(h.error_count("miner"), 0);
        // But they are recorded
        assert_eq!(h.recent_errors("miner").len(), 3);
    }

    #[test]
    fn test_reset_clears_count_and_trip() {
        let h = handler(2);

        report(&h, "miner", ErrorKind::Runtime, "boom");
        assert_eq!(
            report(&h, "miner", ErrorKind::Runtime, "boom"),
            FaultDecision::Tripped
        );

        h.reset("miner");
        assert_eq!(h.error_count("miner"), 0);

        // Threshold can trip again after reset
        report(&h, "miner", ErrorKind::Runtime, "boom");
        assert_eq!(
            report(&h, "miner", ErrorKind::Runtime, "boom"),
            FaultDecision::Tripped
        );
    }

    #[test]
    fn test_ring_buffer_bounded() {
        let h = ErrorHandler::new(&LimitsConfig {
            error_ring_capacity: 3,
            max_errors_per_script: 1000,
            ..Default::default()
        });

        for i in 0..5 {
            report(&h, "miner", ErrorKind::Runtime, &format!("boom {i}"));
        }

        let all = h.all_recent_errors();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message, "boom 2");
        assert_eq!(all[2].message, "boom 4");
    }

    #[test]
    fn test_records_are_sequenced() {
        let h = handler(100);
        report(&h, "a", ErrorKind::Runtime, "one");
        report(&h, "b", ErrorKind::Runtime, "two");

        let all = h.all_recent_errors();
        assert_eq!(all[0].seq, 1);
        assert_eq!(all[1].seq, 2);
    }

    #[test]
    fn test_recent_errors_filters_by_script() {
        let h = handler(100);
        report(&h, "a", ErrorKind::Runtime, "one");
        report(&h, "b", ErrorKind::Runtime, "two");
        report(&h, "a", ErrorKind::Timeout, "three");

        let for_a = h.recent_errors("a");
        assert_eq!(for_a.len(), 2);
        assert!(for_a.iter().all(|r| r.script == "a"));
    }

    #[test]
    fn test_clear_old_errors_keeps_recent() {
        let h = handler(100);
        report(&h, "a", ErrorKind::Runtime, "fresh");

        // Everything is recent, nothing evicted
        assert_eq!(h.clear_old_errors(), 0);
        assert_eq!(h.all_recent_errors().len(), 1);
    }

    #[test]
    fn test_parse_location() {
        let loc = parse_location(r#"[string "miner"]:3: attempt to index a nil value"#).unwrap();
        assert_eq!(loc.chunk, "miner");
        assert_eq!(loc.line, 3);
    }

    #[test]
    fn test_parse_location_no_match() {
        assert!(parse_location("plain message with no location").is_none());
        assert!(parse_location(r#"[string "miner"]: missing line"#).is_none());
    }

    #[test]
    fn test_parse_location_nested_message() {
        let loc =
            parse_location(r#"runtime error: [string "fisher"]:12: bad cast"#).unwrap();
        assert_eq!(loc.chunk, "fisher");
        assert_eq!(loc.line, 12);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::Syntax.to_string(), "syntax error");
        assert_eq!(ErrorKind::Runtime.to_string(), "runtime error");
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
        assert_eq!(ErrorKind::ResourceExceeded.to_string(), "resource exceeded");
    }
}
