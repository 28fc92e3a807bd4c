//! Output capture - decode, cap, record, publish and forward chunks

use crate::events::EngineEvent;
use crate::output::{CapturedOutput, OutputChunk, StreamKind, Utf8Decoder};
use crate::record::RecordId;
use crate::registry::ProcessRegistry;
use chrono::{DateTime, Utc};
use hive_foundation::EventBus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Where chunks go besides the registry and the bus
pub(crate) enum Forward {
    None,
    /// Streaming consumer; the capture waits for capacity
    Bounded(mpsc::Sender<OutputChunk>),
    /// Session reader
    Unbounded(mpsc::UnboundedSender<OutputChunk>),
}

pub(crate) struct Capture {
    id: RecordId,
    pid: u32,
    registry: Arc<ProcessRegistry>,
    bus: Arc<EventBus<EngineEvent>>,
    merge_stderr: bool,
    limit: usize,
    /// Keep forwarding past the cap (only retention stops)
    forward_past_limit: bool,
    used: usize,
    seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
    stdout_decoder: Utf8Decoder,
    stderr_decoder: Utf8Decoder,
    out: CapturedOutput,
    forward: Forward,
}

impl Capture {
    pub fn new(
        id: RecordId,
        pid: u32,
        registry: Arc<ProcessRegistry>,
        bus: Arc<EventBus<EngineEvent>>,
        limit: usize,
        merge_stderr: bool,
        forward: Forward,
    ) -> Self {
        Self {
            id,
            pid,
            registry,
            bus,
            merge_stderr,
            limit,
            forward_past_limit: false,
            used: 0,
            seq: 0,
            last_timestamp: None,
            stdout_decoder: Utf8Decoder::default(),
            stderr_decoder: Utf8Decoder::default(),
            out: CapturedOutput::default(),
            forward,
        }
    }

    pub fn forward_past_limit(mut self) -> Self {
        self.forward_past_limit = true;
        self
    }

    /// Raw bytes from one of the pipes
    pub async fn accept(&mut self, stream: StreamKind, bytes: &[u8]) {
        let text = match stream {
            StreamKind::Stdout => self.stdout_decoder.decode(bytes),
            StreamKind::Stderr => self.stderr_decoder.decode(bytes),
        };
        self.emit(stream, text).await;
    }

    /// Flush decoders and hand over everything retained
    pub async fn finish(mut self) -> CapturedOutput {
        let tail = self.stdout_decoder.finish();
        self.emit(StreamKind::Stdout, tail).await;
        let tail = self.stderr_decoder.finish();
        self.emit(StreamKind::Stderr, tail).await;

        std::mem::take(&mut self.out)
    }

    async fn emit(&mut self, stream: StreamKind, text: String) {
        if text.is_empty() {
            return;
        }
        let stream = if self.merge_stderr {
            StreamKind::Stdout
        } else {
            stream
        };

        let timestamp = self.next_timestamp();
        let retained = self.retain(stream, &text, timestamp);
        if retained.is_empty() && !self.forward_past_limit {
            return;
        }

        let chunk = OutputChunk {
            stream,
            text: if self.forward_past_limit { text } else { retained },
            timestamp,
            seq: self.seq,
        };
        self.seq += 1;

        self.publish(&chunk);
        self.forward(chunk).await;
    }

    /// Wall-clock time, clamped so chunk timestamps never go backwards
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    /// Store what fits under the cap, returns the stored part
    fn retain(&mut self, stream: StreamKind, text: &str, timestamp: DateTime<Utc>) -> String {
        let remaining = self.limit.saturating_sub(self.used);
        let mut cut = text.len().min(remaining);
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }

        if cut < text.len() && !self.out.truncated {
            warn!(id = %self.id, pid = self.pid, limit = self.limit, "Output cap reached, dropping further output");
            self.out.truncated = true;
            self.registry.mark_truncated(self.id);
        }

        let kept = &text[..cut];
        if kept.is_empty() {
            return String::new();
        }
        self.used += kept.len();

        match stream {
            StreamKind::Stdout => self.out.stdout.push_str(kept),
            StreamKind::Stderr => self.out.stderr.push_str(kept),
        }
        self.out.chunks.push(OutputChunk {
            stream,
            text: kept.to_string(),
            timestamp,
            seq: self.seq,
        });
        self.registry.append_output(self.id, stream, kept);

        kept.to_string()
    }

    fn publish(&self, chunk: &OutputChunk) {
        let event = match chunk.stream {
            StreamKind::Stdout => EngineEvent::Stdout {
                id: self.id,
                pid: self.pid,
                text: chunk.text.clone(),
            },
            StreamKind::Stderr => EngineEvent::Stderr {
                id: self.id,
                pid: self.pid,
                text: chunk.text.clone(),
            },
        };
        self.bus.publish(event);
    }

    async fn forward(&mut self, chunk: OutputChunk) {
        let delivered = match &self.forward {
            Forward::None => return,
            Forward::Bounded(tx) => tx.send(chunk).await.is_ok(),
            Forward::Unbounded(tx) => tx.send(chunk).is_ok(),
        };

        if !delivered {
            debug!(id = %self.id, "Output consumer went away, capture continues");
            self.forward = Forward::None;
        }
    }
}
