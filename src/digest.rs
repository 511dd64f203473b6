//! Digest message building for broadcast batches.
//!
//! A digest combines an all-time/today summary from the event store with a
//! per-kind breakdown and short one-line summaries of the just-flushed batch.

use {
    crate::event::{ChainEvent, EventKind, QueuedEvent},
    chrono::{TimeZone, Utc},
    std::collections::HashMap,
};

/// Max one-line event summaries included in a digest.
const MAX_SUMMARY_LINES: usize = 5;

/// Build the composite digest text for one broadcast.
///
/// `batch` is the slice of events flushed this cycle (arrival order),
/// `all_events` the full historical store contents, `now_ms` the broadcast
/// time used to compute the since-midnight boundary.
pub fn build_digest(batch: &[QueuedEvent], all_events: &[ChainEvent], now_ms: i64) -> String {
    let midnight = midnight_ms(now_ms);
    let today = all_events
        .iter()
        .filter(|event| event.timestamp >= midnight)
        .count();

    let mut by_kind: HashMap<EventKind, usize> = HashMap::new();
    for queued in batch {
        *by_kind.entry(queued.event.kind).or_insert(0) += 1;
    }

    let mut lines = Vec::new();
    lines.push("🔔 Chain activity digest".to_string());
    lines.push(format!(
        "📊 {} events today, {} all-time",
        today,
        all_events.len()
    ));

    lines.push(format!("🆕 {} new in this batch:", batch.len()));
    for kind in EventKind::all() {
        if let Some(count) = by_kind.get(&kind) {
            lines.push(format!("   {} × {}", count, kind.as_str()));
        }
    }

    for queued in batch.iter().take(MAX_SUMMARY_LINES) {
        lines.push(format!("• {}", summarize(&queued.event)));
    }
    if batch.len() > MAX_SUMMARY_LINES {
        lines.push(format!("… and {} more", batch.len() - MAX_SUMMARY_LINES));
    }

    lines.join("\n")
}

/// One-line summary of a single event.
pub fn summarize(event: &ChainEvent) -> String {
    format!(
        "[{}] {} @ block {} ({}): {}",
        event.kind.as_str(),
        shorten(&event.contract),
        event.block_number,
        shorten(&event.tx_hash),
        event.detail
    )
}

/// Start of the current UTC day in millis.
fn midnight_ms(now_ms: i64) -> i64 {
    let now = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now);
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc().timestamp_millis())
        .unwrap_or(now_ms)
}

fn shorten(hash: &str) -> String {
    let tail = hash.len().saturating_sub(4);
    // Hashes are hex in practice, but the slice points must land on char
    // boundaries for anything else that reaches a digest.
    if hash.len() > 12 && hash.is_char_boundary(6) && hash.is_char_boundary(tail) {
        format!("{}…{}", &hash[..6], &hash[tail..])
    } else {
        hash.to_string()
    }
}
