//! Metric definitions for the engine.
//!
//! The engine records through the `metrics` facade. Nothing is exported
//! unless the embedding application installs a recorder.

use metrics::{describe_counter, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Unit,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const fn counter(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description,
            unit,
            labels: &[],
        }
    }

    pub const fn histogram(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description,
            unit,
            labels: &[],
        }
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Register this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metrics recorded by the engine.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Frames sent, by tag (`W`, `R`, `E`).
    pub const FRAMES_SENT: Metric =
        Metric::counter("dmrprog.wire.frames_sent", "Frames sent to the radio", Unit::Count)
            .with_labels(&["tag"]);

    pub const BYTES_WRITTEN: Metric = Metric::counter(
        "dmrprog.wire.bytes_written",
        "Bytes written to the transport",
        Unit::Bytes,
    );

    pub const BYTES_READ: Metric = Metric::counter(
        "dmrprog.wire.bytes_read",
        "Bytes consumed from the inbound buffer",
        Unit::Bytes,
    );

    /// Write, erase and commit requests that got no ACK.
    pub const ACK_MISSING: Metric = Metric::counter(
        "dmrprog.wire.ack_missing",
        "Requests that were not acknowledged",
        Unit::Count,
    )
    .with_labels(&["task"]);

    pub const CHECKSUM_FAILURES: Metric = Metric::counter(
        "dmrprog.wire.checksum_failures",
        "Read responses with a bad checksum",
        Unit::Count,
    );

    pub const TASKS_FAILED: Metric = Metric::counter(
        "dmrprog.engine.tasks_failed",
        "Tasks that completed with an error",
        Unit::Count,
    )
    .with_labels(&["task"]);

    pub const TASK_DURATION: Metric = Metric::histogram(
        "dmrprog.engine.task_duration_ms",
        "Time spent executing a task",
        Unit::Milliseconds,
    )
    .with_labels(&["task"]);

    pub const RECORDS_DECODED: Metric = Metric::counter(
        "dmrprog.engine.records_decoded",
        "Records decoded by bulk reads",
        Unit::Count,
    );

    pub const ALL: &[Metric] = &[
        FRAMES_SENT,
        BYTES_WRITTEN,
        BYTES_READ,
        ACK_MISSING,
        CHECKSUM_FAILURES,
        TASKS_FAILED,
        TASK_DURATION,
        RECORDS_DECODED,
    ];
}

/// Describe every engine metric. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_metric_names_unique() {
        let names: HashSet<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        assert_eq!(names.len(), metric_defs::ALL.len());
        assert!(metric_defs::ALL.iter().all(|m| m.name.starts_with("dmrprog.")));
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }
}
