//! Append-only log of checksummed frames.
//!
//! Frame layout, little endian:
//!
//! ```text
//! [len: u32][crc32(payload): u32][payload: len bytes]
//! ```
//!
//! Replay stops at the first frame that is truncated or fails its checksum;
//! that tail is cut off so later appends follow the last good frame. Appends
//! also cut anything found past the last good frame before writing.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::atomic::write_atomic;
use crate::error::StoreError;

const HEADER: usize = 8;

pub struct FrameLog {
    path: PathBuf,
    /// Absent after a failed reopen; the next append opens the file again.
    file: Option<File>,
    /// Offset just past the last intact frame.
    len: u64,
    frames: usize,
}

impl FrameLog {
    /// Open the log at `path`, creating it if needed, and return every
    /// intact frame payload in append order.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, Vec<Vec<u8>>), StoreError> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let (payloads, valid) = decode_frames(&bytes);
        if valid < bytes.len() {
            warn!(
                path = %path.display(),
                offset = valid,
                discarded = bytes.len() - valid,
                "discarding torn log tail"
            );
            file.set_len(valid as u64)?;
            file.sync_all()?;
        }
        debug!(path = %path.display(), frames = payloads.len(), "replayed log");

        let log = Self {
            path,
            file: Some(file),
            len: valid as u64,
            frames: payloads.len(),
        };
        Ok((log, payloads))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames currently in the log.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Append one frame directly after the last intact frame and sync it.
    ///
    /// Bytes found past that point are cut off first. A failed write is
    /// truncated away so the next append starts from a clean tail.
    pub fn append(&mut self, payload: &[u8]) -> Result<(), StoreError> {
        let frame = encode_frame(payload)?;
        let len = self.len;
        let path = self.path.clone();
        let file = self.file()?;

        let actual = file.metadata()?.len();
        if actual < len {
            return Err(StoreError::Corrupt(format!(
                "log is {actual} bytes, expected at least {len}"
            )));
        }
        if actual > len {
            warn!(
                path = %path.display(),
                offset = len,
                discarded = actual - len,
                "discarding bytes after last frame"
            );
            file.set_len(len)?;
        }

        if let Err(err) = write_frame(file, &frame) {
            warn!(path = %path.display(), error = %err, "append failed, truncating");
            if file.set_len(len).is_err() {
                self.file = None;
            }
            return Err(err);
        }
        self.len += frame.len() as u64;
        self.frames += 1;
        Ok(())
    }

    /// Replace the whole log with a single frame.
    pub fn rewrite(&mut self, payload: &[u8]) -> Result<(), StoreError> {
        let frame = encode_frame(payload)?;
        write_atomic(&self.path, &frame)?;
        // The old handle still points at the replaced file.
        self.file = None;
        self.len = frame.len() as u64;
        self.frames = 1;
        debug!(path = %self.path.display(), bytes = payload.len(), "compacted log");
        self.file()?;
        Ok(())
    }

    fn file(&mut self) -> Result<&mut File, StoreError> {
        let file = match self.file.take() {
            Some(file) => file,
            None => OpenOptions::new().append(true).open(&self.path)?,
        };
        Ok(self.file.insert(file))
    }
}

fn write_frame(file: &mut File, frame: &[u8]) -> Result<(), StoreError> {
    file.write_all(frame)?;
    file.sync_data()?;
    Ok(())
}

fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, StoreError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Corrupt(format!("frame of {} bytes is too large", payload.len())))?;
    let mut frame = Vec::with_capacity(HEADER + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode frames from the start of `bytes`. Returns the payloads and the
/// length of the intact prefix.
fn decode_frames(bytes: &[u8]) -> (Vec<Vec<u8>>, usize) {
    let mut payloads = Vec::new();
    let mut offset = 0;
    while let Some((payload, next)) = decode_frame(bytes, offset) {
        payloads.push(payload.to_vec());
        offset = next;
    }
    (payloads, offset)
}

fn decode_frame(bytes: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    let header = bytes.get(offset..offset + HEADER)?;
    let (len, crc) = header.split_at(4);
    let len = u32::from_le_bytes(len.try_into().ok()?) as usize;
    let crc = u32::from_le_bytes(crc.try_into().ok()?);
    let start = offset + HEADER;
    let payload = bytes.get(start..start + len)?;
    (crc32fast::hash(payload) == crc).then_some((payload, start + len))
}
