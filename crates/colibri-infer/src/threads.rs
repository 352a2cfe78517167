use std::sync::atomic::{AtomicUsize, Ordering};

// 0 means no hint has been applied yet.
static THREAD_HINT: AtomicUsize = AtomicUsize::new(0);

/// Record the intra-op thread count for the engine runtimes.
///
/// The setting is process-wide and last-writer-wins: containers apply their
/// stored hint at construction and again on load, so the most recently
/// constructed container decides. Applying the current value again is a
/// no-op.
pub fn apply_hint(n_threads: usize) {
    if n_threads == 0 {
        return;
    }
    let previous = THREAD_HINT.swap(n_threads, Ordering::SeqCst);
    if previous != n_threads {
        log::debug!("intra-op thread hint set to {n_threads}");
    }
}

/// The most recently applied hint, if any.
pub fn current_hint() -> Option<usize> {
    match THREAD_HINT.load(Ordering::SeqCst) {
        0 => None,
        n => Some(n),
    }
}
