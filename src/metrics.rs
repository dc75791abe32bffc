use tracing::trace;

// Trace-level counters. The Prometheus handle in main renders whatever a
// recorder collects; these only emit events.

pub fn inc_requests(route: &'static str) {
    trace!(target = "calligraph.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "calligraph.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn upload_finished(ok: bool, elapsed_ms: u128) {
    trace!(
        target = "calligraph.metrics",
        outcome = if ok { "success" } else { "failure" },
        elapsed_ms = elapsed_ms as u64,
        "uploads_total_inc"
    );
}

pub fn batch_finished(batch: usize, groups: usize, elapsed_ms: u128) {
    trace!(
        target = "calligraph.metrics",
        batch = batch,
        groups = groups,
        elapsed_ms = elapsed_ms as u64,
        "batch_elapsed"
    );
}
