//! Weft: a concurrent, memoizing evaluator for workflows of components.
//!
//! Re-exports the core types and the engine, and sets up logging for
//! embedding applications.

pub use weft_core::*;
pub use weft_engine::*;

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `weft=info,warn`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .try_init();
}
