//! Evidence export (CSV, JSON) and aggregate statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::evidence::event::{Event, EventBody};

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn model_of(event: &Event) -> &str {
    match &event.body {
        EventBody::Generation(g) => &g.model_id,
        _ => "",
    }
}

fn action_of(event: &Event) -> &str {
    match &event.body {
        EventBody::Plan(p) => &p.action,
        _ => "",
    }
}

/// Render events as CSV with header `timestamp,type,ws_id,model,action`.
pub fn to_csv(events: &[Event]) -> String {
    let mut out = String::from("timestamp,type,ws_id,model,action\n");
    for event in events {
        let row = [
            event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            event.kind().as_str().to_string(),
            event.ws_id.clone(),
            model_of(event).to_string(),
            action_of(event).to_string(),
        ];
        let cells: Vec<String> = row.iter().map(|v| csv_field(v)).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

/// Render events as a pretty-printed JSON array.
pub fn to_json(events: &[Event]) -> Result<String> {
    Ok(serde_json::to_string_pretty(events)?)
}

/// Aggregate counts over a set of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub total: usize,
    /// Counts keyed by event type.
    pub by_type: BTreeMap<String, usize>,
    /// Counts keyed by generation model id.
    pub by_model: BTreeMap<String, usize>,
    /// Counts keyed by `YYYY-MM-DD` date.
    pub by_date: BTreeMap<String, usize>,
}

/// Compute totals by type, by model, and by date.
pub fn stats(events: &[Event]) -> LogStats {
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_model: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_date: BTreeMap<String, usize> = BTreeMap::new();

    for event in events {
        *by_type.entry(event.kind().as_str().to_string()).or_default() += 1;
        let model = model_of(event);
        if !model.is_empty() {
            *by_model.entry(model.to_string()).or_default() += 1;
        }
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        *by_date.entry(date).or_default() += 1;
    }

    LogStats {
        total: events.len(),
        by_type,
        by_model,
        by_date,
    }
}
