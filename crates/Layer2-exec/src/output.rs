//! Process output - chunks, final results and stderr classification
//!
//! Provides:
//! - Timestamped output chunks tagged by stream
//! - Immutable `ProcessResult` snapshots built once at exit
//! - Line-by-line stderr classification into error/warning families
//! - Incremental UTF-8 decoding across read boundaries

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Output stream tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A piece of output as it arrived from the OS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputChunk {
    /// Stream tag
    pub stream: StreamKind,

    /// Decoded text
    pub text: String,

    /// Time the bytes were read, never earlier than the previous chunk's
    pub timestamp: DateTime<Utc>,

    /// Arrival order within the process
    pub seq: u64,
}

// ============================================================================
// Stderr classification
// ============================================================================

fn error_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(error|failed|exception|fatal|panic|segfault|permission denied|not found|syntax error)",
        )
        .expect("error pattern is valid")
    })
}

fn warning_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(warning|deprecated|caution)").expect("warning pattern is valid")
    })
}

/// Stderr lines sorted into error and warning families
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StderrAnalysis {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl StderrAnalysis {
    /// Classify every non-empty line; a line counts as an error before a warning
    pub fn classify(stderr: &str) -> Self {
        let mut analysis = Self::default();

        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if error_pattern().is_match(line) {
                analysis.errors.push(line.to_string());
            } else if warning_pattern().is_match(line) {
                analysis.warnings.push(line.to_string());
            }
        }

        analysis
    }
}

// ============================================================================
// ProcessResult
// ============================================================================

/// Immutable snapshot of a finished process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    pid: Option<u32>,
    command: String,
    exit_code: Option<i32>,
    signal: Option<String>,
    stdout: String,
    stderr: String,
    combined: String,
    chunks: Vec<OutputChunk>,
    duration: Duration,
    truncated: bool,
    analysis: StderrAnalysis,
}

impl ProcessResult {
    /// Build the snapshot; `combined` is the chunk list in arrival order
    pub(crate) fn new(
        pid: Option<u32>,
        command: impl Into<String>,
        exit_code: Option<i32>,
        signal: Option<String>,
        captured: CapturedOutput,
        duration: Duration,
    ) -> Self {
        let mut ordered: Vec<&OutputChunk> = captured.chunks.iter().collect();
        ordered.sort_by_key(|c| c.seq);
        let combined = ordered.iter().map(|c| c.text.as_str()).collect::<String>();

        Self {
            pid,
            command: command.into(),
            exit_code,
            signal,
            analysis: StderrAnalysis::classify(&captured.stderr),
            stdout: captured.stdout,
            stderr: captured.stderr,
            combined,
            chunks: captured.chunks,
            duration,
            truncated: captured.truncated,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Exit code (None when terminated by a signal)
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Terminating signal name, e.g. `SIGKILL`
    pub fn signal(&self) -> Option<&str> {
        self.signal.as_deref()
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Both streams interleaved by arrival time
    pub fn combined(&self) -> &str {
        &self.combined
    }

    pub fn chunks(&self) -> &[OutputChunk] {
        &self.chunks
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Output exceeded the capture cap and was cut
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn analysis(&self) -> &StderrAnalysis {
        &self.analysis
    }

    pub fn error_lines(&self) -> &[String] {
        &self.analysis.errors
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stderr error lines, or any exit other than 0
    pub fn has_errors(&self) -> bool {
        !self.analysis.errors.is_empty() || !self.success()
    }

    pub fn has_warnings(&self) -> bool {
        !self.analysis.warnings.is_empty()
    }

    /// Brief one-line summary
    pub fn summary(&self) -> String {
        let status = match (self.exit_code, &self.signal) {
            (Some(code), _) => format!("exit {}", code),
            (None, Some(signal)) => format!("killed by {}", signal),
            (None, None) => "no exit status".to_string(),
        };
        format!(
            "'{}' ({}): {} stdout bytes, {} errors, {} warnings, {:.2}s{}",
            self.command,
            status,
            self.stdout.len(),
            self.analysis.errors.len(),
            self.analysis.warnings.len(),
            self.duration.as_secs_f64(),
            if self.truncated { ", truncated" } else { "" }
        )
    }
}

/// Everything captured from one process, handed to `ProcessResult::new`
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub chunks: Vec<OutputChunk>,
    pub truncated: bool,
}

// ============================================================================
// Incremental UTF-8 decoding
// ============================================================================

/// Decodes a byte stream read in arbitrary pieces
///
/// Incomplete multi-byte sequences at the end of a read are held back until
/// the next read; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(e) => (e.valid_up_to(), Some(e.error_len())),
            };

            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));

            match invalid {
                None => {
                    self.pending.clear();
                    break;
                }
                // incomplete tail, wait for more bytes
                Some(None) => {
                    self.pending.drain(..valid);
                    break;
                }
                Some(Some(len)) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
            }
        }

        out
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(stream: StreamKind, text: &str, seq: u64, at: DateTime<Utc>) -> OutputChunk {
        OutputChunk {
            stream,
            text: text.to_string(),
            timestamp: at,
            seq,
        }
    }

    #[test]
    fn test_classify_stderr() {
        let analysis = StderrAnalysis::classify(
            "compiling...\nwarning: unused variable\nError: file not found\n\nDeprecated API\nPANIC at the disco\n",
        );
        assert_eq!(analysis.errors.len(), 2);
        assert_eq!(analysis.warnings.len(), 2);
        assert_eq!(analysis.errors[0], "Error: file not found");
    }

    #[test]
    fn test_nonzero_exit_has_errors() {
        let result = ProcessResult::new(
            Some(1),
            "false",
            Some(1),
            None,
            CapturedOutput::default(),
            Duration::from_millis(5),
        );
        assert!(result.has_errors());
        assert!(!result.success());
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_combined_follows_arrival_order() {
        let t0 = Utc::now();
        // wall clock stepped back between the last two reads
        let earlier = t0 - chrono::Duration::seconds(30);
        let captured = CapturedOutput {
            stdout: "ab".into(),
            stderr: "X".into(),
            chunks: vec![
                chunk(StreamKind::Stdout, "a", 0, t0),
                chunk(StreamKind::Stdout, "b", 2, earlier),
                chunk(StreamKind::Stderr, "X", 1, t0),
            ],
            truncated: false,
        };

        let result = ProcessResult::new(None, "cmd", Some(0), None, captured, Duration::ZERO);
        assert_eq!(result.combined(), "aXb");
        assert!(result.summary().contains("exit 0"));
    }

    #[test]
    fn test_decoder_carries_partial_sequences() {
        let bytes = "héllo ✓".as_bytes();
        let mut decoder = Utf8Decoder::default();

        let mut out = String::new();
        for b in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(b)));
        }
        out.push_str(&decoder.finish());

        assert_eq!(out, "héllo ✓");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        let out = decoder.decode(&[b'a', 0xff, b'b']);
        assert_eq!(out, "a\u{fffd}b");
        assert_eq!(decoder.finish(), "");
    }
}
