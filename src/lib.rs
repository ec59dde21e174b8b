//! MixMatch Server Library
//!
//! Audio reference-matching service: accepts a target and a reference track,
//! remasters the target in the background and serves the result.

pub mod config;
pub mod mixing;
pub mod server;

// Re-export commonly used types for convenience
pub use mixing::{
    CommandMatcher, FfmpegWaveformExtractor, InMemoryJobStore, JobStore, MixJob, MixJobStatus,
    MixManager,
};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
