//! Shared harness for the end-to-end suites.
//!
//! `TestServer` boots the full router on a random port with fake audio
//! collaborators, `TestClient` speaks its HTTP API. Test files import from
//! here only.

mod client;
mod constants;
mod fixtures;
mod server;

pub use client::TestClient;
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{audio_bytes, failing_audio_bytes};
pub use server::TestServer;
