//! ID generation utilities for Ratchet
//!
//! Provides functions for generating unique identifiers for runs and events.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate a unique run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2c3d4`
pub fn generate_run_id() -> String {
    let random: u32 = rand::rng().random();
    format!("run-{}-{:08x}", now_ms(), random)
}

/// Generate an event ID
///
/// Format: `evt-{timestamp_ms}-{random_hex}`
pub fn generate_event_id() -> String {
    let random: u16 = rand::rng().random();
    format!("evt-{}-{:04x}", now_ms(), random)
}

/// Namespace under which a run's artifacts are stored.
pub fn run_namespace(run_id: &str) -> String {
    format!("runs/{}", run_id)
}
