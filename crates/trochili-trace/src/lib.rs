//! Binary trace stream for the Trochili kernel.
//!
//! The kernel reports scheduling decisions, thread state changes and IPC
//! wake-ups as small binary *records* through a [`TraceHook`]. This crate owns
//! the record identifiers ([`records`]) and a host-side [`Tracer`] that frames
//! each record for transport:
//!
//! ```text
//! seq | record id | [timestamp u32 LE] | payload... | checksum | 0x7E
//! ```
//!
//! Every byte before the trailing flag is escaped (`0x7E`/`0x7D` become
//! `0x7D, byte ^ 0x20`). The checksum is the inverted 8-bit sum of the
//! unescaped bytes that precede it.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

pub mod records;

/// Largest payload accepted by default.
const DEFAULT_MAX_PAYLOAD: usize = 32;

const FRAME_FLAG: u8 = 0x7E;
const FRAME_ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;

/// Errors raised while emitting or decoding trace frames.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("tracer lock poisoned")]
    Poisoned,
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
}

impl<T> From<PoisonError<T>> for TraceError {
    fn from(_: PoisonError<T>) -> Self {
        Self::Poisoned
    }
}

/// Callback the kernel invokes for every record: `(record id, payload, stamp)`.
pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> Result<(), TraceError> + Send + Sync>;

/// Tracer configuration.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub max_payload: usize,
    pub timestamps: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            timestamps: true,
        }
    }
}

/// One emitted record, as handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub seq: u8,
    pub id: u8,
    pub timestamp: Option<u32>,
    pub payload: Vec<u8>,
}

/// Sink for framed bytes.
pub trait TraceBackend: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError>;
}

/// Backend writing frames to any [`Write`] implementation.
pub struct WriterBackend<W: Write + Send + 'static> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send + 'static> TraceBackend for WriterBackend<W> {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        let mut writer = self.writer.lock()?;
        writer.write_all(frame)?;
        Ok(())
    }
}

/// Backend that keeps every frame in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all frames written so far.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }

    /// Decodes every captured frame, skipping malformed ones.
    pub fn records(&self, timestamps: bool) -> Vec<TraceRecord> {
        self.frames()
            .iter()
            .filter_map(|frame| decode_frame(frame, timestamps).ok())
            .collect()
    }
}

impl TraceBackend for MemoryBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        self.frames.lock()?.push(frame.to_vec());
        Ok(())
    }
}

/// Record encoder bound to one backend.
pub struct Tracer<B: TraceBackend> {
    backend: B,
    cfg: TraceConfig,
    seq: u8,
    epoch: Instant,
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(cfg: TraceConfig, backend: B) -> Self {
        Self {
            backend,
            cfg,
            seq: 0,
            epoch: Instant::now(),
        }
    }

    pub fn into_handle(self) -> TracerHandle<B> {
        TracerHandle {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    /// Frames one record and passes it to the backend.
    pub fn record(
        &mut self,
        id: u8,
        payload: &[u8],
        stamp: bool,
    ) -> Result<TraceRecord, TraceError> {
        if payload.len() > self.cfg.max_payload {
            return Err(TraceError::PayloadTooLarge(payload.len()));
        }

        let timestamp = (self.cfg.timestamps && stamp).then(|| micros(self.epoch.elapsed()));
        self.seq = self.seq.wrapping_add(1);

        let record = TraceRecord {
            seq: self.seq,
            id,
            timestamp,
            payload: payload.to_vec(),
        };
        self.backend.write_frame(&encode_frame(&record))?;
        Ok(record)
    }
}

fn micros(elapsed: Duration) -> u32 {
    // Wraps after ~71 minutes, same as a 32-bit hardware timestamp.
    elapsed.as_micros() as u32
}

/// Shared, clonable handle to a [`Tracer`].
pub struct TracerHandle<B: TraceBackend> {
    inner: Arc<Mutex<Tracer<B>>>,
}

impl<B: TraceBackend> Clone for TracerHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: TraceBackend + 'static> TracerHandle<B> {
    pub fn emit(&self, id: u8, payload: &[u8]) -> Result<TraceRecord, TraceError> {
        self.inner.lock()?.record(id, payload, false)
    }

    /// Builds a hook suitable for `KernelBuilder::with_trace_hook`.
    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |id, payload, stamp| {
            inner.lock()?.record(id, payload, stamp).map(|_| ())
        })
    }
}

/// Convenience backend for early bring-up.
pub fn stdout_backend() -> WriterBackend<io::Stdout> {
    WriterBackend::new(io::stdout())
}

fn push_escaped(out: &mut Vec<u8>, byte: u8) {
    if byte == FRAME_FLAG || byte == FRAME_ESCAPE {
        out.push(FRAME_ESCAPE);
        out.push(byte ^ ESCAPE_XOR);
    } else {
        out.push(byte);
    }
}

/// Serializes a record into one escaped, flag-terminated frame.
pub fn encode_frame(record: &TraceRecord) -> Vec<u8> {
    let mut body = Vec::with_capacity(record.payload.len() + 6);
    body.push(record.seq);
    body.push(record.id);
    if let Some(ts) = record.timestamp {
        body.extend_from_slice(&ts.to_le_bytes());
    }
    body.extend_from_slice(&record.payload);

    let sum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    body.push(!sum);

    let mut frame = Vec::with_capacity(body.len() * 2 + 1);
    for byte in body {
        push_escaped(&mut frame, byte);
    }
    frame.push(FRAME_FLAG);
    frame
}

/// Parses a frame produced by [`encode_frame`].
///
/// `timestamps` must match the tracer configuration that produced the frame,
/// since the stamp is not self-describing.
pub fn decode_frame(frame: &[u8], timestamps: bool) -> Result<TraceRecord, TraceError> {
    let (last, escaped) = frame
        .split_last()
        .ok_or(TraceError::Malformed("empty frame"))?;
    if *last != FRAME_FLAG {
        return Err(TraceError::Malformed("missing trailing flag"));
    }

    let mut body = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.iter();
    while let Some(&byte) = bytes.next() {
        match byte {
            FRAME_ESCAPE => {
                let next = bytes
                    .next()
                    .ok_or(TraceError::Malformed("dangling escape"))?;
                body.push(next ^ ESCAPE_XOR);
            }
            FRAME_FLAG => return Err(TraceError::Malformed("flag inside frame")),
            other => body.push(other),
        }
    }

    let (checksum, content) = body
        .split_last()
        .ok_or(TraceError::Malformed("no checksum"))?;
    let sum = content.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if !sum != *checksum {
        return Err(TraceError::Malformed("checksum mismatch"));
    }

    let header = if timestamps { 6 } else { 2 };
    if content.len() < header {
        return Err(TraceError::Malformed("short frame"));
    }
    let timestamp = timestamps
        .then(|| u32::from_le_bytes([content[2], content[3], content[4], content[5]]));

    Ok(TraceRecord {
        seq: content[0],
        id: content[1],
        timestamp,
        payload: content[header..].to_vec(),
    })
}
