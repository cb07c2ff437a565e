//! Framed append-only log.
//!
//! Every committed batch is one frame:
//!
//! ```text
//! | magic "RSLG" | version u16 | kind u8 | len u32 | CBOR payload | crc32 |
//! ```
//!
//! Integers are little-endian and the CRC covers everything before it. A
//! frame is either fully present and valid or it is treated as the end of
//! the log; recovery cuts the invalid tail away.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Magic bytes opening every frame.
pub const LOG_MAGIC: [u8; 4] = *b"RSLG";

/// Current frame format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// What a frame's payload contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// An atomic batch of operations.
    Batch = 1,
    /// A full snapshot replacing everything before it.
    Snapshot = 2,
}

impl FrameKind {
    /// Converts a byte to a frame kind.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Batch),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Converts the frame kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Outcome of walking a log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Number of valid frames.
    pub frames: usize,
    /// Number of snapshot frames among them.
    pub snapshots: usize,
    /// Length of the valid prefix in bytes.
    pub valid_len: u64,
    /// Total length of the log in bytes.
    pub total_len: u64,
    /// Why the scan stopped early, if it did.
    pub tail_error: Option<String>,
}

impl ScanReport {
    /// Bytes after the valid prefix.
    #[must_use]
    pub fn torn_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }

    /// Returns true if the whole log is valid.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.tail_error.is_none()
    }
}

/// An append-only log of CBOR frames over a [`StorageBackend`].
pub struct FrameLog {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
}

impl FrameLog {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend,
            sync_on_write,
        }
    }

    /// Encodes `record` and appends it as one frame.
    ///
    /// Returns the frame's offset. The frame is durable on return when
    /// `sync_on_write` is set. If the write, flush or sync fails, the log is
    /// cut back to where the frame started, so a failed append never
    /// replays.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append<T: Serialize>(&mut self, kind: FrameKind, record: &T) -> StoreResult<u64> {
        let data = frame(kind, record)?;
        let start = self.backend.size()?;

        match self.write_frame(&data) {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if let Err(rollback) = self.backend.truncate(start) {
                    warn!(offset = start, error = %rollback, "could not roll back failed append");
                }
                Err(e)
            }
        }
    }

    fn write_frame(&mut self, data: &[u8]) -> StoreResult<u64> {
        let offset = self.backend.append(data)?;
        if self.sync_on_write {
            self.backend.flush()?;
            self.backend.sync()?;
        }
        Ok(offset)
    }

    /// Walks every valid frame in order, stopping at the first invalid one.
    ///
    /// `visit` receives each frame's kind and raw payload. An error from
    /// `visit` is treated like an invalid frame: the scan stops and the frame
    /// is excluded from the valid prefix.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend itself fails.
    pub fn scan<F>(&self, mut visit: F) -> StoreResult<ScanReport>
    where
        F: FnMut(FrameKind, &[u8]) -> StoreResult<()>,
    {
        let total_len = self.backend.size()?;
        let mut report = ScanReport {
            total_len,
            ..ScanReport::default()
        };
        let mut offset = 0u64;

        while offset < total_len {
            match self.read_frame(offset, total_len)? {
                Ok((kind, payload, next)) => {
                    if let Err(e) = visit(kind, &payload) {
                        report.tail_error = Some(format!("frame at {offset}: {e}"));
                        break;
                    }
                    report.frames += 1;
                    if kind == FrameKind::Snapshot {
                        report.snapshots += 1;
                    }
                    offset = next;
                }
                Err(reason) => {
                    report.tail_error = Some(format!("frame at {offset}: {reason}"));
                    break;
                }
            }
        }

        report.valid_len = offset;
        Ok(report)
    }

    /// Scans the log and truncates any invalid tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails while reading or truncating.
    pub fn recover<F>(&mut self, visit: F) -> StoreResult<ScanReport>
    where
        F: FnMut(FrameKind, &[u8]) -> StoreResult<()>,
    {
        let report = self.scan(visit)?;
        if let Some(reason) = &report.tail_error {
            warn!(
                torn_bytes = report.torn_bytes(),
                reason = %reason,
                "truncating invalid log tail"
            );
            self.backend.truncate(report.valid_len)?;
        }
        Ok(report)
    }

    /// Replaces the whole log with a single frame.
    ///
    /// On failure the previous log is left as it was.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the replacement fails.
    pub fn rewrite<T: Serialize>(&mut self, kind: FrameKind, record: &T) -> StoreResult<()> {
        let data = frame(kind, record)?;
        self.backend.replace(&data)
    }

    /// Returns the log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> StoreResult<u64> {
        self.backend.size()
    }

    /// Flushes and syncs the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    pub fn sync(&mut self) -> StoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()
    }

    /// Reads the frame at `offset`.
    ///
    /// The outer result carries backend failures; the inner one describes
    /// why the bytes at `offset` are not a valid frame.
    fn read_frame(
        &self,
        offset: u64,
        total_len: u64,
    ) -> StoreResult<Result<(FrameKind, Vec<u8>, u64), String>> {
        let remaining = total_len - offset;
        if remaining < (HEADER_SIZE + CRC_SIZE) as u64 {
            return Ok(Err(format!("short header ({remaining} bytes)")));
        }

        let header = self.backend.read_at(offset, HEADER_SIZE)?;
        if header[0..4] != LOG_MAGIC {
            return Ok(Err("bad magic".into()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            return Ok(Err(format!("unsupported version {version}")));
        }
        let Some(kind) = FrameKind::from_byte(header[6]) else {
            return Ok(Err(format!("unknown frame kind {}", header[6])));
        };
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let frame_len = (HEADER_SIZE + len + CRC_SIZE) as u64;
        if frame_len > remaining {
            return Ok(Err(format!(
                "frame of {frame_len} bytes exceeds remaining {remaining}"
            )));
        }

        let body = self
            .backend
            .read_at(offset, HEADER_SIZE + len + CRC_SIZE)?;
        let (covered, crc_bytes) = body.split_at(HEADER_SIZE + len);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if compute_crc32(covered) != stored {
            return Ok(Err("checksum mismatch".into()));
        }

        Ok(Ok((kind, covered[HEADER_SIZE..].to_vec(), offset + frame_len)))
    }
}

impl std::fmt::Debug for FrameLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLog")
            .field("size", &self.backend.size().ok())
            .field("sync_on_write", &self.sync_on_write)
            .finish()
    }
}

fn frame<T: Serialize>(kind: FrameKind, record: &T) -> StoreResult<Vec<u8>> {
    let payload = encode(record)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Encoding("frame payload too large".into()))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&LOG_MAGIC);
    data.extend_from_slice(&LOG_VERSION.to_le_bytes());
    data.push(kind.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Encodes a record as CBOR.
///
/// # Errors
///
/// Returns [`StoreError::Encoding`] if serialization fails.
pub fn encode<T: Serialize>(record: &T) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(record, &mut buf).map_err(|e| StoreError::Encoding(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR record.
///
/// # Errors
///
/// Returns [`StoreError::Decoding`] if the bytes do not describe a `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Decoding(e.to_string()))
}

/// Computes a CRC32 (IEEE polynomial) checksum.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
