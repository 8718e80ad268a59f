//! The evidence layer: typed events, the hash-chained log, emission, and
//! lesson extraction.

pub mod emitter;
pub mod event;
pub mod export;
pub mod lessons;
pub mod log;
pub mod query;

pub use emitter::{model_id, Emitter};
pub use event::{
    AcceptanceData, ApprovalData, DecisionData, Event, EventBody, EventKind, GenerationData,
    LessonData, LessonOutcome, PlanData, QaPair, VerificationData,
};
pub use export::{stats, to_csv, to_json, LogStats};
pub use lessons::{
    decision_records, extract_lesson, lesson_event, similar_decisions, CheckResult,
    DecisionMatch, DecisionRecord, Lesson, VerificationReport,
};
pub use log::{read_all, verify, EvidenceLog, GENESIS_HASH};
