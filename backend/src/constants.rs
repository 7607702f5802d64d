// =============================================================================
// Matchmaker Backend Constants
// =============================================================================
// Tunable defaults for the swipe engine, the dialog hubs and the HTTP layer.
// Most of them can be overridden through the environment (see utils/config.rs).

// =============================================================================
// SERVER CONFIGURATION
// =============================================================================

/// Default server port if not specified in environment
pub const DEFAULT_SERVER_PORT: u16 = 3000;

/// Per-request timeout for REST routes
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum REST requests processed concurrently
pub const MAX_CONCURRENT_REQUESTS: usize = 100;

/// Header carrying the per-request id, set when the client did not send one
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Body returned for unknown routes
pub const NOT_FOUND_MESSAGE: &str =
    "404 page not found. Check /version and the API reference for available routes";

// =============================================================================
// DATABASE CONFIGURATION
// =============================================================================

/// Default pool size
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// How long to wait for a pooled connection before failing
pub const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Attempts per store call, the first one included
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// First backoff delay between store retries
pub const DEFAULT_RETRY_BASE_MS: u64 = 50;

/// Upper bound for a single backoff delay
pub const DEFAULT_RETRY_MAX_MS: u64 = 2_000;

// =============================================================================
// SWIPES & MATCHES
// =============================================================================

/// Page size when the client does not send one
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

/// Largest page a client may request
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Buffered match events per subscriber before the slowest one lags
pub const MATCH_EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// DIALOG HUBS
// =============================================================================

/// How long a hub with no connections survives before it is retired
pub const DEFAULT_HUB_IDLE_GRACE_SECS: u64 = 30;

/// Outbound events buffered per connection before relay to it is paused
pub const DEFAULT_HUB_OUTBOUND_QUEUE: usize = 256;

/// A connection paused for longer than this is dropped
pub const DEFAULT_HUB_UNRESPONSIVE_SECS: u64 = 60;

/// How often the registry sweeps for idle hubs
pub const DEFAULT_HUB_SWEEP_INTERVAL_SECS: u64 = 5;

/// Internal hub housekeeping tick
pub const HUB_TICK_INTERVAL_MS: u64 = 500;

/// Messages read from the store per replay round
pub const HUB_REPLAY_BATCH: i64 = 128;

/// Largest chat payload accepted, in bytes
pub const MAX_MESSAGE_PAYLOAD_BYTES: usize = 4096;

// =============================================================================
// HELPER FUNCTIONS FOR VALIDATION
// =============================================================================

/// Normalizes a client supplied page size
pub fn clamp_page_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Validates a chat payload before it reaches a hub
pub fn is_valid_payload(payload: &str) -> bool {
    !payload.trim().is_empty() && payload.len() <= MAX_MESSAGE_PAYLOAD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_page_limit() {
        assert_eq!(clamp_page_limit(None), DEFAULT_PAGE_LIMIT);
        assert_eq!(clamp_page_limit(Some(0)), 1);
        assert_eq!(clamp_page_limit(Some(10_000)), MAX_PAGE_LIMIT);
    }

    #[test]
    fn test_payload_validation() {
        assert!(is_valid_payload("hi"));
        assert!(!is_valid_payload("   "));
        assert!(!is_valid_payload(&"x".repeat(MAX_MESSAGE_PAYLOAD_BYTES + 1)));
    }
}
