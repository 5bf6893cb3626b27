//! Prometheus text exposition parsing

use crate::types::metrics::MetricsSnapshot;

/// Split a sample line into metric name and value.
///
/// Labels are dropped and anything after the value (a timestamp) is ignored.
fn split_sample(line: &str) -> Option<(&str, f64)> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    let mut rest = &line[name_end..];

    if rest.starts_with('{') {
        let close = rest.find('}')?;
        rest = &rest[close + 1..];
    }

    let value = rest.split_whitespace().next()?.parse::<f64>().ok()?;
    if name.is_empty() || !value.is_finite() {
        return None;
    }
    Some((name, value))
}

fn to_u64(value: f64) -> u64 {
    value.max(0.0) as u64
}

fn to_u32(value: f64) -> u32 {
    value.max(0.0) as u32
}

fn apply(snapshot: &mut MetricsSnapshot, suffix: &str, value: f64) {
    match suffix {
        "prompt_tokens_seconds" => snapshot.prompt_tokens_per_second = value,
        "predicted_tokens_seconds" => snapshot.predicted_tokens_per_second = value,
        "prompt_tokens_total" => snapshot.prompt_tokens_total = to_u64(value),
        "tokens_predicted_total" => snapshot.predicted_tokens_total = to_u64(value),
        "prompt_seconds_total" => snapshot.prompt_seconds_total = value,
        "tokens_predicted_seconds_total" => snapshot.predicted_seconds_total = value,
        "n_decode_total" => {
            snapshot.decode_total = to_u64(value);
            snapshot.total_requests = to_u64(value);
        }
        "n_busy_slots_per_decode" => snapshot.busy_slots_per_decode = value,
        "n_tokens_max" => snapshot.tokens_max = to_u64(value),
        "requests_processing" => snapshot.active_requests = to_u32(value),
        "requests_deferred" => snapshot.queue_size = to_u32(value),
        "llm_server_vram_total" => snapshot.vram_total_bytes = to_u64(value),
        "llm_server_vram_used" => snapshot.vram_used_bytes = to_u64(value),
        "llm_server_n_ctx" => snapshot.context_size = to_u32(value),
        "llm_server_n_parallel" => snapshot.parallel_slots = to_u32(value),
        "llm_server_n_threads" => snapshot.thread_count = to_u32(value),
        _ => {}
    }
}

/// Parse a `/metrics` body into a snapshot.
///
/// Metric names are matched on the part after the last `:` or `.`, so both
/// `llamacpp:prompt_tokens_total` and a bare `prompt_tokens_total` count.
/// Unknown names and unparsable lines are ignored.
pub fn parse_prometheus_metrics(text: &str) -> MetricsSnapshot {
    let mut snapshot = MetricsSnapshot::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, value)) = split_sample(line) else {
            continue;
        };
        let suffix = name.rsplit(|c: char| c == ':' || c == '.').next().unwrap_or(name);
        apply(&mut snapshot, suffix, value);
    }

    snapshot
}
