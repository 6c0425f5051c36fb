use tracing::trace;

// Lightweight metrics helpers; trace-based so a bare batch run stays quiet.

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "importer.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn rows_written(count: usize) {
    trace!(target = "importer.metrics", count = count, "rows_written");
}
