//! Lesson extraction from verification results and similarity search over
//! prior decisions.

use serde::{Deserialize, Serialize};

use crate::evidence::event::{
    DecisionData, Event, EventBody, LessonData, LessonOutcome,
};

/// One named check inside a verification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

/// Raw verification outcome for a workstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VerificationReport {
    pub passed: bool,
    pub checks: Vec<CheckResult>,
    pub failed_commands: Vec<String>,
    pub missing_files: Vec<String>,
}

/// Structured lesson derived from a verification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub ws_id: String,
    /// `passed`, `mixed`, or `failed`.
    pub outcome: String,
    pub what_worked: Vec<String>,
    pub what_failed: Vec<String>,
    pub category: String,
}

/// Derive a [`Lesson`] from a verification report.
pub fn extract_lesson(ws_id: &str, report: &VerificationReport) -> Lesson {
    let what_worked: Vec<String> = report
        .checks
        .iter()
        .filter(|c| c.passed)
        .map(|c| c.name.clone())
        .collect();

    let mut what_failed: Vec<String> = report
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| {
            if c.message.is_empty() {
                c.name.clone()
            } else {
                format!("{}: {}", c.name, c.message)
            }
        })
        .collect();
    what_failed.extend(report.failed_commands.iter().map(|c| format!("command: {c}")));
    what_failed.extend(report.missing_files.iter().map(|f| format!("missing: {f}")));

    let outcome = if report.passed {
        "passed"
    } else if !what_worked.is_empty() {
        "mixed"
    } else {
        "failed"
    };

    let category = if what_failed.is_empty() {
        "execution"
    } else {
        "verification"
    };

    Lesson {
        ws_id: ws_id.to_string(),
        outcome: outcome.to_string(),
        what_worked,
        what_failed,
        category: category.to_string(),
    }
}

/// Compose the short deterministic insight string for a lesson.
fn insight_of(lesson: &Lesson) -> String {
    match (lesson.what_worked.is_empty(), lesson.what_failed.is_empty()) {
        (false, false) => format!(
            "worked: {}; failed: {}",
            lesson.what_worked.join(", "),
            lesson.what_failed.join(", ")
        ),
        (false, true) => format!("worked: {}", lesson.what_worked.join(", ")),
        (true, false) => format!("failed: {}", lesson.what_failed.join(", ")),
        (true, true) => "no checks recorded".to_string(),
    }
}

/// Build the evidence event for a lesson.
///
/// The report outcome `passed` maps to the event outcome `worked`.
pub fn lesson_event(lesson: &Lesson, related_decisions: Vec<String>) -> Event {
    let outcome = match lesson.outcome.as_str() {
        "passed" => LessonOutcome::Worked,
        "mixed" => LessonOutcome::Mixed,
        _ => LessonOutcome::Failed,
    };
    Event::new(
        lesson.ws_id.clone(),
        EventBody::Lesson(LessonData {
            category: lesson.category.clone(),
            insight: insight_of(lesson),
            source_ws_id: lesson.ws_id.clone(),
            outcome,
            related_decisions,
        }),
    )
}

/// A prior decision paired with its eventual outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub question: String,
    pub tags: Vec<String>,
    /// Free-form outcome label; lessons supply `worked`/`failed`/`mixed`.
    pub outcome: String,
}

/// A decision matched by [`similar_decisions`], with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionMatch {
    pub record: DecisionRecord,
    pub score: u32,
}

/// Assemble decision records from an event slice.
///
/// A decision's outcome comes from the first lesson event that lists it in
/// `related_decisions`; decisions with no linked lesson get `"unknown"`.
pub fn decision_records(events: &[Event]) -> Vec<DecisionRecord> {
    let lessons: Vec<&LessonData> = events
        .iter()
        .filter_map(|e| match &e.body {
            EventBody::Lesson(l) => Some(l),
            _ => None,
        })
        .collect();

    events
        .iter()
        .filter_map(|e| match &e.body {
            EventBody::Decision(d) => Some((e, d)),
            _ => None,
        })
        .map(|(event, data): (&Event, &DecisionData)| {
            let outcome = lessons
                .iter()
                .find(|l| l.related_decisions.contains(&event.id))
                .map(|l| l.outcome.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            DecisionRecord {
                id: event.id.clone(),
                question: data.question.clone(),
                tags: data.tags.clone(),
                outcome,
            }
        })
        .collect()
}

/// Find prior decisions relevant to a new question.
///
/// Only decisions whose outcome is a failure signal (`failed`, anything
/// containing `fail`, or `mixed`) are considered, since the point is surfacing
/// mistakes worth not repeating. A match scores one point for a substring
/// hit of the query in the question and one for any shared tag; everything
/// with score > 0 is returned, unranked.
pub fn similar_decisions(
    query: &str,
    tags: &[String],
    prior: &[DecisionRecord],
) -> Vec<DecisionMatch> {
    let needle = query.to_lowercase();
    let query_tags: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();

    prior
        .iter()
        .filter(|r| {
            let outcome = r.outcome.to_lowercase();
            outcome == "failed" || outcome.contains("fail") || outcome == "mixed"
        })
        .filter_map(|r| {
            let mut score = 0u32;
            if !needle.is_empty() && r.question.to_lowercase().contains(&needle) {
                score += 1;
            }
            if r.tags
                .iter()
                .any(|t| query_tags.contains(&t.to_lowercase()))
            {
                score += 1;
            }
            (score > 0).then(|| DecisionMatch {
                record: r.clone(),
                score,
            })
        })
        .collect()
}
