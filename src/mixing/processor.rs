//! External audio collaborators: the matcher and the waveform extractor.
//!
//! Both are traits so that the runner does not care how the work is done. The
//! default implementations shell out: the matcher runs a configurable command
//! and the extractor decodes with ffmpeg.

use super::models::WaveformPoint;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors raised by the audio collaborators.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Audio matching failed: {0}")]
    MatchFailed(String),

    #[error("Waveform extraction failed: {0}")]
    WaveformFailed(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces a mastered file from a target and a reference.
#[async_trait]
pub trait AudioMatcher: Send + Sync {
    async fn match_audio(
        &self,
        target: &Path,
        reference: &Path,
        output: &Path,
    ) -> Result<(), ProcessingError>;
}

/// Produces a downsampled amplitude envelope of an audio file.
#[async_trait]
pub trait WaveformExtractor: Send + Sync {
    /// Returns at most `num_points` points.
    async fn extract_waveform(
        &self,
        audio: &Path,
        num_points: usize,
    ) -> Result<Vec<WaveformPoint>, ProcessingError>;
}

const TARGET_PLACEHOLDER: &str = "{target}";
const REFERENCE_PLACEHOLDER: &str = "{reference}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Default matcher command line.
pub const DEFAULT_MATCHER_COMMAND: &str = "matchering-cli {target} {reference} {output}";

/// Matcher that runs an external program.
///
/// The command line is split with shell quoting rules; `{target}`,
/// `{reference}` and `{output}` inside any argument are replaced with the
/// corresponding paths.
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    program: String,
    args: Vec<String>,
}

impl CommandMatcher {
    pub fn parse(command_line: &str) -> Result<Self, ProcessingError> {
        let mut parts = shlex::split(command_line)
            .ok_or_else(|| ProcessingError::InvalidCommand(command_line.to_string()))?
            .into_iter();

        let program = parts
            .next()
            .ok_or_else(|| ProcessingError::InvalidCommand("empty command".to_string()))?;
        let args: Vec<String> = parts.collect();

        if !args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
            return Err(ProcessingError::InvalidCommand(format!(
                "'{}' does not reference {}",
                command_line, OUTPUT_PLACEHOLDER
            )));
        }

        Ok(Self { program, args })
    }

    fn render_args(&self, target: &Path, reference: &Path, output: &Path) -> Vec<String> {
        let target = target.to_string_lossy();
        let reference = reference.to_string_lossy();
        let output = output.to_string_lossy();

        self.args
            .iter()
            .map(|arg| {
                arg.replace(TARGET_PLACEHOLDER, &target)
                    .replace(REFERENCE_PLACEHOLDER, &reference)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

#[async_trait]
impl AudioMatcher for CommandMatcher {
    async fn match_audio(
        &self,
        target: &Path,
        reference: &Path,
        output: &Path,
    ) -> Result<(), ProcessingError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = self.render_args(target, reference, output);
        debug!("Running matcher: {} {:?}", self.program, args);

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProcessingError::MatchFailed(format!("could not run {}: {}", self.program, e))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ProcessingError::MatchFailed(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ProcessingError::MatchFailed(format!(
                "{} produced no output file",
                self.program
            )));
        }

        Ok(())
    }
}

/// Sample rate the extractor decodes at. The waveform only needs an envelope.
const WAVEFORM_SAMPLE_RATE: u32 = 22_050;

/// Waveform extractor that decodes audio to mono f32 PCM with ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegWaveformExtractor {
    ffmpeg_path: String,
    sample_rate: u32,
}

impl FfmpegWaveformExtractor {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            sample_rate: WAVEFORM_SAMPLE_RATE,
        }
    }
}

#[async_trait]
impl WaveformExtractor for FfmpegWaveformExtractor {
    async fn extract_waveform(
        &self,
        audio: &Path,
        num_points: usize,
    ) -> Result<Vec<WaveformPoint>, ProcessingError> {
        let sample_rate = self.sample_rate.to_string();
        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(audio)
            .args(["-f", "f32le", "-ac", "1", "-ar", sample_rate.as_str(), "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProcessingError::WaveformFailed(format!(
                    "could not run {}: {}",
                    self.ffmpeg_path, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessingError::WaveformFailed(stderr.trim().to_string()));
        }

        let samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(compute_waveform(&samples, self.sample_rate, num_points))
    }
}

/// Downsample mono samples into RMS buckets.
///
/// Each bucket holds `len / num_points` samples (at least one); trailing
/// samples that do not fill a bucket are ignored. Bucket `i` is reported at
/// `i / num_points * duration`.
pub fn compute_waveform(
    samples: &[f32],
    sample_rate: u32,
    num_points: usize,
) -> Vec<WaveformPoint> {
    if samples.is_empty() || num_points == 0 || sample_rate == 0 {
        return Vec::new();
    }

    let duration = samples.len() as f64 / sample_rate as f64;
    let samples_per_point = (samples.len() / num_points).max(1);

    (0..num_points)
        .map(|i| (i, i * samples_per_point))
        .take_while(|(_, start)| *start < samples.len())
        .map(|(i, start)| {
            let end = (start + samples_per_point).min(samples.len());
            let segment = &samples[start..end];
            let mean_square = segment
                .iter()
                .map(|s| (*s as f64) * (*s as f64))
                .sum::<f64>()
                / segment.len() as f64;

            WaveformPoint {
                time: (i as f64 / num_points as f64) * duration,
                amplitude: mean_square.sqrt(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compute_waveform_constant_signal() {
        let samples = vec![0.5f32; 1000];
        let points = compute_waveform(&samples, 100, 10);

        assert_eq!(points.len(), 10);
        for p in &points {
            assert!((p.amplitude - 0.5).abs() < 1e-6);
        }
        assert_eq!(points[0].time, 0.0);
        assert!((points[5].time - 5.0).abs() < 1e-9);
        assert!(points.last().unwrap().time < 10.0);
    }

    #[test]
    fn test_compute_waveform_rms() {
        // Alternating +1/-1 has RMS 1, silence has RMS 0
        let mut samples: Vec<f32> = vec![];
        for i in 0..50 {
            samples.push(if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        samples.extend(std::iter::repeat(0.0).take(50));

        let points = compute_waveform(&samples, 10, 2);
        assert_eq!(points.len(), 2);
        assert!((points[0].amplitude - 1.0).abs() < 1e-9);
        assert_eq!(points[1].amplitude, 0.0);
    }

    #[test]
    fn test_compute_waveform_short_input() {
        let samples = vec![0.25f32; 3];
        let points = compute_waveform(&samples, 3, 500);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| (p.amplitude - 0.25).abs() < 1e-9));
    }

    #[test]
    fn test_compute_waveform_empty() {
        assert!(compute_waveform(&[], 44_100, 500).is_empty());
        assert!(compute_waveform(&[0.1, 0.2], 44_100, 0).is_empty());
    }

    #[test]
    fn test_command_matcher_parse() {
        let matcher =
            CommandMatcher::parse("python3 -m match --out '{output}' {target} {reference}")
                .unwrap();
        let args = matcher.render_args(
            Path::new("/up/t.wav"),
            Path::new("/up/r.wav"),
            Path::new("/out/o.wav"),
        );
        assert_eq!(matcher.program, "python3");
        assert_eq!(
            args,
            vec!["-m", "match", "--out", "/out/o.wav", "/up/t.wav", "/up/r.wav"]
        );
    }

    #[test]
    fn test_command_matcher_parse_errors() {
        assert!(CommandMatcher::parse("").is_err());
        assert!(CommandMatcher::parse("tool 'unterminated").is_err());
        assert!(CommandMatcher::parse("tool {target} {reference}").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_matcher_runs_program() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("t.wav");
        let reference = dir.path().join("r.wav");
        let output = dir.path().join("out").join("o.wav");
        std::fs::write(&target, b"target").unwrap();
        std::fs::write(&reference, b"reference").unwrap();

        let matcher = CommandMatcher::parse("cp {target} {output}").unwrap();
        matcher
            .match_audio(&target, &reference, &output)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"target");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_matcher_reports_failure() {
        let dir = TempDir::new().unwrap();
        let matcher = CommandMatcher::parse("sh -c 'echo bad input >&2; exit 3' {output}").unwrap();
        let err = matcher
            .match_audio(
                &dir.path().join("t.wav"),
                &dir.path().join("r.wav"),
                &dir.path().join("o.wav"),
            )
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bad input"), "{}", message);
    }

    #[tokio::test]
    async fn test_command_matcher_missing_program() {
        let dir = TempDir::new().unwrap();
        let matcher =
            CommandMatcher::parse("definitely-not-a-real-matcher-binary {output}").unwrap();
        let result = matcher
            .match_audio(
                &dir.path().join("t.wav"),
                &dir.path().join("r.wav"),
                &dir.path().join("o.wav"),
            )
            .await;
        assert!(matches!(result, Err(ProcessingError::MatchFailed(_))));
    }
}
