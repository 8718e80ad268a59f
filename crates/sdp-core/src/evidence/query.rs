//! Pure query helpers over slices of evidence events.

use chrono::{DateTime, Utc};

use crate::evidence::event::{Event, EventBody, EventKind};

/// Events of one kind.
pub fn filter_by_type(events: &[Event], kind: EventKind) -> Vec<Event> {
    events.iter().filter(|e| e.kind() == kind).cloned().collect()
}

/// Events belonging to one workstream.
pub fn filter_by_ws(events: &[Event], ws_id: &str) -> Vec<Event> {
    events.iter().filter(|e| e.ws_id == ws_id).cloned().collect()
}

/// Events referencing one commit SHA.
pub fn filter_by_commit(events: &[Event], sha: &str) -> Vec<Event> {
    events
        .iter()
        .filter(|e| e.commit_sha.as_deref() == Some(sha))
        .cloned()
        .collect()
}

/// Generation events produced by one model.
pub fn filter_by_model(events: &[Event], model_id: &str) -> Vec<Event> {
    events
        .iter()
        .filter(|e| match &e.body {
            EventBody::Generation(g) => g.model_id == model_id,
            _ => false,
        })
        .cloned()
        .collect()
}

/// Events at or after `since`.
pub fn filter_since(events: &[Event], since: DateTime<Utc>) -> Vec<Event> {
    events
        .iter()
        .filter(|e| e.timestamp >= since)
        .cloned()
        .collect()
}

/// Full-text search over decision question/choice/rationale.
///
/// Case-insensitive substring match; non-decision events never match.
pub fn search(events: &[Event], query: &str) -> Vec<Event> {
    let needle = query.to_lowercase();
    events
        .iter()
        .filter(|e| match &e.body {
            EventBody::Decision(d) => {
                d.question.to_lowercase().contains(&needle)
                    || d.choice.to_lowercase().contains(&needle)
                    || d.rationale.to_lowercase().contains(&needle)
            }
            _ => false,
        })
        .cloned()
        .collect()
}

/// The last `n` events in log order.
pub fn last_n(events: &[Event], n: usize) -> Vec<Event> {
    let start = events.len().saturating_sub(n);
    events[start..].to_vec()
}

/// One page of events plus the stable total count.
///
/// `page` is 1-indexed; a page of 0 is treated as the first page. The end of
/// the slice is clamped, so out-of-range pages return an empty page with the
/// same total.
pub fn paginate(events: &[Event], page: usize, page_size: usize) -> (Vec<Event>, usize) {
    let total = events.len();
    if page_size == 0 {
        return (Vec::new(), total);
    }
    let page = page.max(1);
    let start = (page - 1).saturating_mul(page_size).min(total);
    let end = start.saturating_add(page_size).min(total);
    (events[start..end].to_vec(), total)
}
