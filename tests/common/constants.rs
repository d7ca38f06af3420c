//! Shared constants for end-to-end tests

// ============================================================================
// Seeded identities
// ============================================================================

/// User present in every test database
pub const USER_ID: &str = "user-1";

pub const USER_NAME: &str = "Test Speaker";

/// User that is never created
pub const UNKNOWN_USER_ID: &str = "user-missing";

pub const PHRASE_1_ID: &str = "phrase-1";

pub const PHRASE_1_TEXT: &str = "Good morning";

pub const PHRASE_2_ID: &str = "phrase-2";

pub const PHRASE_2_TEXT: &str = "See you tomorrow";

pub const UNKNOWN_PHRASE_ID: &str = "phrase-missing";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Upload limit used by servers spawned with the default test config
pub const TEST_MAX_UPLOAD_SIZE_BYTES: usize = 64 * 1024;
