//! Process-wide backend bootstrap.

use std::sync::OnceLock;

use tracing::info;

/// What `init` found about the compute backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub name: &'static str,
    /// Hardware threads available to the process (at least 1).
    pub n_threads_available: usize,
}

static BACKEND: OnceLock<BackendInfo> = OnceLock::new();

/// One-time global setup. Idempotent and safe to call from any thread; every
/// caller observes the same `BackendInfo`.
pub fn init() -> &'static BackendInfo {
    BACKEND.get_or_init(|| {
        let n_threads_available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        info!(backend = "cpu", n_threads_available, "backend initialized");
        BackendInfo {
            name: "cpu",
            n_threads_available,
        }
    })
}

pub fn is_initialized() -> bool {
    BACKEND.get().is_some()
}

/// The backend description, if `init` has run.
pub fn info() -> Option<&'static BackendInfo> {
    BACKEND.get()
}
