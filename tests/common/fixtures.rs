//! Fake audio collaborators and upload payloads for end-to-end tests.
//!
//! The fake matcher "masters" a target by copying it, so tests can check that
//! each job's result matches its own target. The fake extractor derives one
//! point per byte so the waveform is predictable.

use super::constants::*;
use async_trait::async_trait;
use mixmatch_server::mixing::{AudioMatcher, ProcessingError, WaveformExtractor, WaveformPoint};
use std::path::Path;
use std::time::Duration;

pub struct FakeMatcher {
    pub delay: Duration,
}

#[async_trait]
impl AudioMatcher for FakeMatcher {
    async fn match_audio(
        &self,
        target: &Path,
        _reference: &Path,
        output: &Path,
    ) -> Result<(), ProcessingError> {
        tokio::time::sleep(self.delay).await;
        let data = tokio::fs::read(target).await?;
        if data.starts_with(FAIL_MARKER) {
            return Err(ProcessingError::MatchFailed(
                "reference and target sample rates differ".to_string(),
            ));
        }
        tokio::fs::write(output, &data).await?;
        Ok(())
    }
}

pub struct FakeWaveformExtractor;

#[async_trait]
impl WaveformExtractor for FakeWaveformExtractor {
    async fn extract_waveform(
        &self,
        audio: &Path,
        num_points: usize,
    ) -> Result<Vec<WaveformPoint>, ProcessingError> {
        let data = tokio::fs::read(audio).await?;
        Ok(data
            .iter()
            .take(num_points)
            .enumerate()
            .map(|(i, b)| WaveformPoint {
                time: i as f64 * 0.1,
                amplitude: *b as f64 / 255.0,
            })
            .collect())
    }
}

/// Deterministic payload of `len` bytes, distinct per `seed`.
pub fn audio_bytes(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Payload the fake matcher rejects.
pub fn failing_audio_bytes(len: usize) -> Vec<u8> {
    let mut data = FAIL_MARKER.to_vec();
    data.extend(audio_bytes(7, len.saturating_sub(FAIL_MARKER.len())));
    data
}
