//! Typed events for the evidence log.
//!
//! Each log line is one [`Event`]. The payload lives in an adjacently tagged
//! [`EventBody`] so the wire shape is `{"type": "plan", "data": {...}}`
//! alongside the envelope fields. Events are created by emitters and never
//! mutated; `prev_hash` is owned by the log writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fieldless mirror of [`EventBody`] used for filtering and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Plan,
    Generation,
    Verification,
    Approval,
    Decision,
    Lesson,
    Acceptance,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Generation => "generation",
            Self::Verification => "verification",
            Self::Approval => "approval",
            Self::Decision => "decision",
            Self::Lesson => "lesson",
            Self::Acceptance => "acceptance",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "generation" => Ok(Self::Generation),
            "verification" => Ok(Self::Verification),
            "approval" => Ok(Self::Approval),
            "decision" => Ok(Self::Decision),
            "lesson" => Ok(Self::Lesson),
            "acceptance" => Ok(Self::Acceptance),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// A question/answer pair captured during planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Payload for a planning event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanData {
    pub scope_files: Vec<String>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_pairs: Option<Vec<QaPair>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deps: Option<Vec<String>>,
}

/// Payload for a code-generation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationData {
    pub model_id: String,
    pub model_version: String,
    pub prompt_hash: String,
    pub files_changed: Vec<String>,
}

/// Payload for a verification-gate event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationData {
    pub passed: bool,
    pub gate_name: String,
    pub coverage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
}

/// Payload for an approval event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalData {
    pub target_branch: String,
    pub commit_sha: String,
    pub approved_by: String,
}

/// Payload for a recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionData {
    pub question: String,
    pub choice: String,
    pub rationale: String,
    pub alternatives: Vec<String>,
    /// Confidence in the chosen alternative, 0.0–1.0.
    pub confidence: f64,
    pub tags: Vec<String>,
    /// Id of an earlier decision this one reverses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverses: Option<String>,
}

/// Outcome classification carried by lesson events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonOutcome {
    Worked,
    Failed,
    Mixed,
}

impl LessonOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worked => "worked",
            Self::Failed => "failed",
            Self::Mixed => "mixed",
        }
    }
}

/// Payload for a lesson extracted from a workstream outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonData {
    pub category: String,
    /// Short deterministic summary of what was learned.
    pub insight: String,
    pub source_ws_id: String,
    pub outcome: LessonOutcome,
    pub related_decisions: Vec<String>,
}

/// Payload for an acceptance-command event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceData {
    pub command: String,
    pub passed: bool,
    pub output: String,
    pub timeout_seconds: u64,
}

/// Type-discriminated event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventBody {
    Plan(PlanData),
    Generation(GenerationData),
    Verification(VerificationData),
    Approval(ApprovalData),
    Decision(DecisionData),
    Lesson(LessonData),
    Acceptance(AcceptanceData),
}

impl EventBody {
    /// The fieldless kind of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Plan(_) => EventKind::Plan,
            Self::Generation(_) => EventKind::Generation,
            Self::Verification(_) => EventKind::Verification,
            Self::Approval(_) => EventKind::Approval,
            Self::Decision(_) => EventKind::Decision,
            Self::Lesson(_) => EventKind::Lesson,
            Self::Acceptance(_) => EventKind::Acceptance,
        }
    }
}

/// One line in the evidence log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque identifier, filled by the constructor when absent.
    pub id: String,

    #[serde(flatten)]
    pub body: EventBody,

    /// RFC-3339 UTC timestamp, filled by the constructor when absent.
    pub timestamp: DateTime<Utc>,

    /// Workstream this event belongs to.
    pub ws_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,

    /// SHA-256 of the previous log line; `"genesis"` for the first record.
    /// Set by the log writer on append.
    #[serde(default)]
    pub prev_hash: String,
}

impl Event {
    /// Create an event with a fresh id and the current UTC time.
    pub fn new(ws_id: impl Into<String>, body: EventBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body,
            timestamp: Utc::now(),
            ws_id: ws_id.into(),
            commit_sha: None,
            prev_hash: String::new(),
        }
    }

    /// Attach the commit SHA the event refers to.
    pub fn with_commit_sha(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    /// The event's kind.
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_decision() -> DecisionData {
        DecisionData {
            question: "which queue library".to_string(),
            choice: "std mpsc".to_string(),
            rationale: "no extra dependency needed".to_string(),
            alternatives: vec!["crossbeam".to_string()],
            confidence: 0.7,
            tags: vec!["infra".to_string()],
            reverses: None,
        }
    }

    #[test]
    fn test_event_new_fills_id_and_timestamp() {
        let e = Event::new("00-054-09", EventBody::Decision(sample_decision()));
        assert!(!e.id.is_empty());
        assert_eq!(e.ws_id, "00-054-09");
        assert!(e.prev_hash.is_empty());
        assert_eq!(e.kind(), EventKind::Decision);
    }

    #[test]
    fn test_event_serde_roundtrip_all_kinds() {
        let bodies = vec![
            EventBody::Plan(PlanData {
                scope_files: vec!["src/lib.rs".to_string()],
                action: "decompose".to_string(),
                feature_id: Some("F042".to_string()),
                ws_count: Some(3),
                summary: None,
                qa_pairs: Some(vec![QaPair {
                    question: "scope?".to_string(),
                    answer: "core only".to_string(),
                }]),
                deps: None,
            }),
            EventBody::Generation(GenerationData {
                model_id: "claude-sonnet".to_string(),
                model_version: "2025-05".to_string(),
                prompt_hash: "abc123".to_string(),
                files_changed: vec!["src/main.rs".to_string()],
            }),
            EventBody::Verification(VerificationData {
                passed: true,
                gate_name: "unit-tests".to_string(),
                coverage: 0.87,
                findings: None,
            }),
            EventBody::Approval(ApprovalData {
                target_branch: "main".to_string(),
                commit_sha: "deadbeef".to_string(),
                approved_by: "reviewer".to_string(),
            }),
            EventBody::Decision(sample_decision()),
            EventBody::Lesson(LessonData {
                category: "verification".to_string(),
                insight: "failed: missing file".to_string(),
                source_ws_id: "00-054-09".to_string(),
                outcome: LessonOutcome::Failed,
                related_decisions: vec![],
            }),
            EventBody::Acceptance(AcceptanceData {
                command: "make test".to_string(),
                passed: false,
                output: "2 failures".to_string(),
                timeout_seconds: 120,
            }),
        ];

        for body in bodies {
            let event = Event::new("00-054-09", body).with_commit_sha("cafe");
            let json = serde_json::to_string(&event).expect("serialize");
            let back: Event = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(event, back);
        }
    }

    #[test]
    fn test_wire_shape_has_type_and_data() {
        let event = Event::new("00-054-09", EventBody::Decision(sample_decision()));
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "decision");
        assert_eq!(value["data"]["choice"], "std mpsc");
        assert!(value.get("commit_sha").is_none(), "absent sha not serialized");
    }

    #[test]
    fn test_event_kind_from_str() {
        for kind in [
            EventKind::Plan,
            EventKind::Generation,
            EventKind::Verification,
            EventKind::Approval,
            EventKind::Decision,
            EventKind::Lesson,
            EventKind::Acceptance,
        ] {
            let parsed: EventKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("bogus".parse::<EventKind>().is_err());
    }
}
