//! Phase timing collector.
//!
//! An explicit object threaded through calls instead of process-wide
//! counters. Callers open a phase, finish it, and flush the collected
//! records when the run ends.

use std::sync::Mutex;
use std::time::Instant;

/// One completed phase measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRecord {
    pub name: String,
    pub duration_ms: u64,
}

/// Handle for an in-flight phase. Finish it via
/// [`MetricsCollector::finish`]; dropping it unfinished discards the
/// measurement with a warning.
pub struct PhaseHandle {
    name: String,
    started: Instant,
    finished: bool,
}

impl Drop for PhaseHandle {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(phase = %self.name, "phase handle dropped without finish");
        }
    }
}

/// Collects phase timings for one run. Thread-safe via an internal mutex;
/// no global state.
#[derive(Default)]
pub struct MetricsCollector {
    records: Mutex<Vec<PhaseRecord>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_phase(&self, name: impl Into<String>) -> PhaseHandle {
        PhaseHandle {
            name: name.into(),
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(&self, mut handle: PhaseHandle) {
        handle.finished = true;
        let record = PhaseRecord {
            name: handle.name.clone(),
            duration_ms: handle.started.elapsed().as_millis() as u64,
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    /// Drain and return all records, logging each one.
    pub fn flush(&self) -> Vec<PhaseRecord> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };
        let drained: Vec<PhaseRecord> = records.drain(..).collect();
        for record in &drained {
            tracing::info!(phase = %record.name, duration_ms = record.duration_ms, "phase complete");
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_finish_flush() {
        let collector = MetricsCollector::new();
        let handle = collector.start_phase("setup");
        collector.finish(handle);
        let records = collector.flush();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "setup");
    }

    #[test]
    fn test_flush_drains() {
        let collector = MetricsCollector::new();
        collector.finish(collector.start_phase("a"));
        assert_eq!(collector.flush().len(), 1);
        assert!(collector.flush().is_empty());
    }

    #[test]
    fn test_multiple_phases_in_order() {
        let collector = MetricsCollector::new();
        collector.finish(collector.start_phase("commit"));
        collector.finish(collector.start_phase("reveal"));
        let names: Vec<String> = collector.flush().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["commit", "reveal"]);
    }
}
