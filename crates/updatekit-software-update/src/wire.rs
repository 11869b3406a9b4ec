//! Streaming scanner over a serialized [`UpdateBundle`](crate::proto::UpdateBundle)
//!
//! Bundles can be far larger than available RAM, so the accessor never
//! decodes one whole. [`scan_bundle`] walks the top-level protobuf framing
//! over a seekable reader and records where each part lives. Payload bytes
//! are only ever touched through bounded readers over those ranges.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::ops::Range;

use tracing::debug;
use updatekit_errors::{Result, UpdateError};
use updatekit_stream::SeekableReader;

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

const FIELD_ROOT_METADATA: u64 = 1;
const FIELD_TARGETS_METADATA: u64 = 2;
const FIELD_TARGET_PAYLOADS: u64 = 3;

const MAP_KEY: u64 = 1;
const MAP_VALUE: u64 = 2;

const MAX_VARINT_LEN: usize = 10;

/// Byte ranges of the parts of a bundle, relative to the bundle start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleLayout {
    /// Serialized `SignedRootMetadata`, if present
    pub root_metadata: Option<Range<usize>>,
    /// Serialized `SignedTargetsMetadata` by name
    pub targets_metadata: BTreeMap<String, Range<usize>>,
    /// Raw payload bytes by target file name
    pub target_payloads: BTreeMap<String, Range<usize>>,
    /// Total bundle size
    pub size: usize,
}

struct Scanner<'a, R: SeekableReader + ?Sized> {
    reader: &'a mut R,
    pos: usize,
}

impl<R: SeekableReader + ?Sized> Scanner<'_, R> {
    fn seek_to(&mut self, pos: usize) -> Result<()> {
        self.reader.seek(SeekFrom::Start(pos as u64))?;
        self.pos = pos;
        Ok(())
    }

    fn read_byte(&mut self, end: usize) -> Result<u8> {
        if self.pos >= end {
            return Err(UpdateError::data_loss("truncated field"));
        }
        let mut byte = [0u8; 1];
        self.reader.read_exact(&mut byte)?;
        self.pos += 1;
        Ok(byte[0])
    }

    fn read_varint(&mut self, end: usize) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_byte(end)?;
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(UpdateError::data_loss("varint too long"))
    }

    /// Read a length prefix and return the range of the delimited body.
    fn read_len_delimited(&mut self, end: usize) -> Result<Range<usize>> {
        let len = self.read_varint(end)?;
        let len = usize::try_from(len)
            .map_err(|e| UpdateError::data_loss(format!("field length {len}: {e}")))?;
        let start = self.pos;
        let body_end = start
            .checked_add(len)
            .filter(|&e| e <= end)
            .ok_or_else(|| UpdateError::data_loss("field overruns its message"))?;
        Ok(start..body_end)
    }

    fn skip_field(&mut self, wire_type: u64, end: usize) -> Result<()> {
        let next = match wire_type {
            WIRE_VARINT => {
                self.read_varint(end)?;
                return Ok(());
            }
            WIRE_FIXED64 => self.pos + 8,
            WIRE_FIXED32 => self.pos + 4,
            WIRE_LEN => self.read_len_delimited(end)?.end,
            other => {
                return Err(UpdateError::data_loss(format!(
                    "unsupported wire type {other}"
                )));
            }
        };
        if next > end {
            return Err(UpdateError::data_loss("field overruns its message"));
        }
        self.seek_to(next)
    }

    /// Parse a `map<string, _>` entry occupying `entry`.
    fn read_map_entry(&mut self, entry: Range<usize>) -> Result<(String, Range<usize>)> {
        let mut key = String::new();
        let mut value = entry.end..entry.end;
        while self.pos < entry.end {
            let tag = self.read_varint(entry.end)?;
            let (field, wire_type) = (tag >> 3, tag & 0x7);
            match (field, wire_type) {
                (MAP_KEY, WIRE_LEN) => {
                    let range = self.read_len_delimited(entry.end)?;
                    let mut bytes = vec![0u8; range.len()];
                    self.reader.read_exact(&mut bytes)?;
                    self.pos = range.end;
                    key = String::from_utf8(bytes)
                        .map_err(|e| UpdateError::data_loss(format!("map key: {e}")))?;
                }
                (MAP_VALUE, WIRE_LEN) => {
                    value = self.read_len_delimited(entry.end)?;
                    self.seek_to(value.end)?;
                }
                _ => self.skip_field(wire_type, entry.end)?,
            }
        }
        Ok((key, value))
    }
}

/// Walk the top-level fields of a bundle.
///
/// # Errors
///
/// `DataLoss` on malformed framing, plus any reader error.
pub fn scan_bundle<R: SeekableReader + ?Sized>(reader: &mut R) -> Result<BundleLayout> {
    reader.seek(SeekFrom::End(0))?;
    let size = reader.tell();
    reader.seek(SeekFrom::Start(0))?;

    let mut layout = BundleLayout {
        size,
        ..BundleLayout::default()
    };
    let mut scanner = Scanner { reader, pos: 0 };

    while scanner.pos < size {
        let tag = scanner.read_varint(size)?;
        let (field, wire_type) = (tag >> 3, tag & 0x7);
        if wire_type != WIRE_LEN {
            scanner.skip_field(wire_type, size)?;
            continue;
        }
        let body = scanner.read_len_delimited(size)?;
        match field {
            FIELD_ROOT_METADATA => {
                layout.root_metadata = Some(body.clone());
                scanner.seek_to(body.end)?;
            }
            FIELD_TARGETS_METADATA => {
                let (name, value) = scanner.read_map_entry(body)?;
                layout.targets_metadata.insert(name, value);
            }
            FIELD_TARGET_PAYLOADS => {
                let (name, value) = scanner.read_map_entry(body)?;
                layout.target_payloads.insert(name, value);
            }
            _ => scanner.seek_to(body.end)?,
        }
    }

    debug!(
        size,
        targets_metadata = layout.targets_metadata.len(),
        payloads = layout.target_payloads.len(),
        has_root = layout.root_metadata.is_some(),
        "Scanned update bundle"
    );
    Ok(layout)
}

/// Read `range` of `reader` into memory.
///
/// # Errors
///
/// Any reader error; `OutOfRange` if the source is shorter than `range`.
pub fn read_range<R: SeekableReader + ?Sized>(reader: &mut R, range: &Range<usize>) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; range.len()];
    if !bytes.is_empty() {
        reader.seek(SeekFrom::Start(range.start as u64))?;
        reader.read_exact(&mut bytes)?;
    }
    Ok(bytes)
}
