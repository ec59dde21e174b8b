//! Shared constants for end-to-end tests

// ============================================================================
// Server
// ============================================================================

/// Maximum time to wait for the test server to answer /health
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for the server
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Request timeout for the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Mixing
// ============================================================================

/// Per-file upload cap used by the test server
pub const TEST_MAX_UPLOAD_SIZE: u64 = 64 * 1024;

/// Waveform points requested by the test server
pub const TEST_WAVEFORM_POINTS: usize = 32;

/// How long to wait for a job to reach a terminal state
pub const JOB_TIMEOUT_MS: u64 = 5000;

/// Poll interval when waiting on a job
pub const JOB_POLL_INTERVAL_MS: u64 = 20;

/// Target content prefix that makes the fake matcher fail
pub const FAIL_MARKER: &[u8] = b"FAIL";
