//! Feedback metrics for recommendations, with quality gates.
//!
//! Every surfaced recommendation eventually lands as accepted, rejected, or
//! refined. The collector keeps the raw feed and derives rates; gates trip
//! when the sample is too small to trust or a rate leaves its band.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::advisor::rules::Recommendation;
use crate::dispatch::checkpoint::{read_json_limited, write_json_atomic, MAX_STATE_FILE_BYTES};
use crate::error::Result;

/// How the user handled one recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Accepted,
    Rejected,
    Refined,
}

/// One feedback entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub kind: FeedbackKind,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub confidence: f64,
}

/// Collector for recommendation feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisorMetrics {
    records: Vec<FeedbackRecord>,
}

impl AdvisorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record feedback for a recommendation.
    pub fn record(&mut self, kind: FeedbackKind, rec: &Recommendation) {
        self.records.push(FeedbackRecord {
            kind,
            timestamp: Utc::now(),
            category: rec.category.as_str().to_string(),
            confidence: rec.confidence,
        });
    }

    /// Total feedback entries.
    pub fn decisions(&self) -> usize {
        self.records.len()
    }

    fn count(&self, kind: FeedbackKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    /// accepted / decisions; 0 when empty.
    pub fn acceptance_rate(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.count(FeedbackKind::Accepted) as f64 / self.records.len() as f64
        }
    }

    /// refined / decisions; 0 when empty.
    pub fn correction_rate(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.count(FeedbackKind::Refined) as f64 / self.records.len() as f64
        }
    }

    /// Mean confidence of recorded recommendations; 0 when empty.
    pub fn average_confidence(&self) -> f64 {
        if self.records.is_empty() {
            0.0
        } else {
            self.records.iter().map(|r| r.confidence).sum::<f64>() / self.records.len() as f64
        }
    }

    /// Feedback counts keyed by category.
    pub fn counts_by_category(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.category.clone()).or_default() += 1;
        }
        counts
    }

    /// Load persisted metrics; a missing file yields an empty collector.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        read_json_limited(path, MAX_STATE_FILE_BYTES)
    }

    /// Atomically persist the collector.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

/// Thresholds for trusting the advisor's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGates {
    /// Below this sample size the metrics are not yet meaningful.
    pub min_samples: usize,
    pub min_acceptance: f64,
    pub max_correction: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_samples: 10,
            min_acceptance: 0.5,
            max_correction: 0.3,
        }
    }
}

/// Result of evaluating metrics against gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub sample_size_ok: bool,
    pub acceptance_ok: bool,
    pub correction_ok: bool,
}

impl GateReport {
    /// A gate has tripped when any check fails.
    pub fn tripped(&self) -> bool {
        !(self.sample_size_ok && self.acceptance_ok && self.correction_ok)
    }
}

impl QualityGates {
    /// Evaluate collected metrics against these thresholds.
    pub fn evaluate(&self, metrics: &AdvisorMetrics) -> GateReport {
        GateReport {
            sample_size_ok: metrics.decisions() >= self.min_samples,
            acceptance_ok: metrics.acceptance_rate() >= self.min_acceptance,
            correction_ok: metrics.correction_rate() <= self.max_correction,
        }
    }
}
