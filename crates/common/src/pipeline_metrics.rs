//! Outcome counters for the envelope pipelines.
//!
//! Services receive an `Arc<dyn PipelineMetrics>` at construction and report
//! one outcome per message and one per rule or point. Emission is best effort
//! and never feeds back into control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const MESSAGES_TOTAL: &str = "fieldline_messages_total";
pub const EMITS_TOTAL: &str = "fieldline_emit_outcomes_total";

/// Terminal state of a consumed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageOutcome {
    Priming,
    DecodeFailed,
    InvalidEnvelope,
    Acked,
    Requeued,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Priming => "priming",
            MessageOutcome::DecodeFailed => "decode_failed",
            MessageOutcome::InvalidEnvelope => "invalid_envelope",
            MessageOutcome::Acked => "acked",
            MessageOutcome::Requeued => "requeued",
        }
    }
}

/// Result of one evaluate-and-emit (rules) or persist-and-emit (points) pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmitOutcome {
    Emitted,
    NotMatched,
    EvaluationFailed,
    Duplicate,
    StoreFailed,
    PublishFailed,
}

impl EmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitOutcome::Emitted => "emitted",
            EmitOutcome::NotMatched => "not_matched",
            EmitOutcome::EvaluationFailed => "evaluation_failed",
            EmitOutcome::Duplicate => "duplicate",
            EmitOutcome::StoreFailed => "store_failed",
            EmitOutcome::PublishFailed => "publish_failed",
        }
    }
}

pub trait PipelineMetrics: Send + Sync {
    fn record_message(&self, outcome: MessageOutcome);
    fn record_emit(&self, outcome: EmitOutcome);
}

/// Forwards outcomes to the process-wide `metrics` recorder, labelled by pipeline.
#[derive(Debug, Clone)]
pub struct RecorderMetrics {
    pipeline: &'static str,
}

impl RecorderMetrics {
    pub fn new(pipeline: &'static str) -> Self {
        Self { pipeline }
    }

    pub fn shared(pipeline: &'static str) -> Arc<dyn PipelineMetrics> {
        Arc::new(Self::new(pipeline))
    }
}

impl PipelineMetrics for RecorderMetrics {
    fn record_message(&self, outcome: MessageOutcome) {
        ::metrics::counter!(
            MESSAGES_TOTAL,
            "pipeline" => self.pipeline,
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    fn record_emit(&self, outcome: EmitOutcome) {
        ::metrics::counter!(
            EMITS_TOTAL,
            "pipeline" => self.pipeline,
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl PipelineMetrics for NoopMetrics {
    fn record_message(&self, _outcome: MessageOutcome) {}
    fn record_emit(&self, _outcome: EmitOutcome) {}
}

const MESSAGE_OUTCOMES: [MessageOutcome; 5] = [
    MessageOutcome::Priming,
    MessageOutcome::DecodeFailed,
    MessageOutcome::InvalidEnvelope,
    MessageOutcome::Acked,
    MessageOutcome::Requeued,
];

const EMIT_OUTCOMES: [EmitOutcome; 6] = [
    EmitOutcome::Emitted,
    EmitOutcome::NotMatched,
    EmitOutcome::EvaluationFailed,
    EmitOutcome::Duplicate,
    EmitOutcome::StoreFailed,
    EmitOutcome::PublishFailed,
];

/// Counting sink, handy for asserting outcomes in tests and local runs.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    messages: [AtomicU64; 5],
    emits: [AtomicU64; 6],
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, outcome: MessageOutcome) -> u64 {
        let idx = MESSAGE_OUTCOMES
            .iter()
            .position(|o| *o == outcome)
            .unwrap_or_default();
        self.messages[idx].load(Ordering::Relaxed)
    }

    pub fn emits(&self, outcome: EmitOutcome) -> u64 {
        let idx = EMIT_OUTCOMES
            .iter()
            .position(|o| *o == outcome)
            .unwrap_or_default();
        self.emits[idx].load(Ordering::Relaxed)
    }
}

impl PipelineMetrics for CountingMetrics {
    fn record_message(&self, outcome: MessageOutcome) {
        if let Some(idx) = MESSAGE_OUTCOMES.iter().position(|o| *o == outcome) {
            self.messages[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_emit(&self, outcome: EmitOutcome) {
        if let Some(idx) = EMIT_OUTCOMES.iter().position(|o| *o == outcome) {
            self.emits[idx].fetch_add(1, Ordering::Relaxed);
        }
    }
}
