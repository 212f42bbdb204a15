use std::fmt;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::bytes;
use crate::error::{EsfsError, Result};

/// The signature in directory entries.
pub const DIRENTRY_SIGNATURE: &[u8; 8] = b"DirEntry";
/// Every directory entry is a fixed 1024-byte slot.
pub const DIRENTRY_SIZE: usize = 1024;
/// The attribute list starts at or after this offset.
pub const ATTRIBUTE_AREA_OFFSET: usize = 96;

// DirectoryEntry.nodeType values.
pub const NODE_TYPE_FILE: u8 = 1;
pub const NODE_TYPE_DIRECTORY: u8 = 2;

// Attribute types.
pub const ATTRIBUTE_DATA: u16 = 1;
pub const ATTRIBUTE_FILENAME: u16 = 2;

// DataAttribute.indirection values.
pub const INDIRECTION_DIRECT: u8 = 1;
pub const INDIRECTION_L1: u8 = 2;

/// Fixed header size of the data attribute; the minimum a usable one can be.
pub const DATA_ATTRIBUTE_HEADER: usize = 32;
const FILENAME_ATTRIBUTE_HEADER: usize = 8;
const ATTRIBUTE_HEADER: usize = 4;

/// A parsed 1024-byte on-disk directory entry.
///
/// The raw slot is retained so the attribute list can be walked after
/// parsing; a node owns its entry by value, so attribute lookups never
/// depend on the disk buffer staying alive.
#[derive(Clone)]
pub struct DirectoryEntry {
    pub identifier: [u8; 16],
    // CRC-32 of the entry; parsed, never verified.
    pub checksum: u32,
    pub attribute_offset: u16,
    pub node_type: u8,
    pub attribute_count: u8,
    // Microseconds since the Unix epoch.
    pub creation_time: u64,
    pub access_time: u64,
    pub modification_time: u64,
    pub file_size: u64,
    pub parent: [u8; 16],
    pub content_type: [u8; 16],
    raw: [u8; DIRENTRY_SIZE],
}

/// The DATA attribute of an entry: either embedded bytes (DIRECT) or an
/// extent list (L1), starting `data_offset` bytes into the attribute.
pub struct DataAttribute<'a> {
    pub indirection: u8,
    pub data_offset: u8,
    pub count: u16,
    pub size: usize,
    // The entry's bytes from the attribute header to the end of the slot.
    // The declared size can lie about the embedded byte count, so reads are
    // additionally bounded by what the slot actually holds.
    pub tail: &'a [u8],
}

impl DirectoryEntry {
    /// Parse a raw directory entry slot.
    ///
    /// Verifies the signature and that the attribute list starts at an
    /// 8-byte-aligned offset inside the slot. All other fields are exposed
    /// as-is; the checksum is not computed.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < DIRENTRY_SIZE || &data[..8] != DIRENTRY_SIGNATURE {
            return Err(EsfsError::BadFs("incorrect directory signature"));
        }

        let attribute_offset = bytes::le_u16(data, 28)?;
        let off = attribute_offset as usize;
        if off < ATTRIBUTE_AREA_OFFSET || off > DIRENTRY_SIZE - ATTRIBUTE_HEADER || off & 7 != 0 {
            return Err(EsfsError::BadFs("incorrect directory signature"));
        }

        let mut raw = [0u8; DIRENTRY_SIZE];
        raw.copy_from_slice(&data[..DIRENTRY_SIZE]);

        Ok(DirectoryEntry {
            identifier: bytes::id16(data, 8)?,
            checksum: bytes::le_u32(data, 24)?,
            attribute_offset,
            node_type: data[30],
            attribute_count: data[31],
            creation_time: bytes::le_u64(data, 32)?,
            access_time: bytes::le_u64(data, 40)?,
            modification_time: bytes::le_u64(data, 48)?,
            file_size: bytes::le_u64(data, 56)?,
            parent: bytes::id16(data, 64)?,
            content_type: bytes::id16(data, 80)?,
            raw,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.node_type == NODE_TYPE_DIRECTORY
    }

    pub fn is_file(&self) -> bool {
        self.node_type == NODE_TYPE_FILE
    }

    /// Walk the attribute list for the first attribute of `attrid` with
    /// `size >= min_size`.
    ///
    /// The advertised `attribute_count` is not trusted; the walk is bounded
    /// by the slot itself. Any structural violation (misaligned offset,
    /// undersized record, a record overrunning the slot) ends the search and
    /// the attribute is reported missing.
    pub fn find_attribute(&self, attrid: u16, min_size: usize) -> Option<&[u8]> {
        let (off, size) = self.find_attribute_range(attrid, min_size)?;
        Some(&self.raw[off..off + size])
    }

    fn find_attribute_range(&self, attrid: u16, min_size: usize) -> Option<(usize, usize)> {
        let mut off = self.attribute_offset as usize;
        while off <= DIRENTRY_SIZE - ATTRIBUTE_HEADER {
            if off & 7 != 0 {
                return None;
            }
            let atype = bytes::le_u16(&self.raw, off).ok()?;
            let size = bytes::le_u16(&self.raw, off + 2).ok()? as usize;
            if size < ATTRIBUTE_HEADER || off + size > DIRENTRY_SIZE {
                return None;
            }
            if atype == attrid && size >= min_size {
                return Some((off, size));
            }
            off += size;
        }
        None
    }

    /// The node's filename, or `None` when the attribute is absent or its
    /// declared length does not fit the attribute.
    pub fn filename(&self) -> Option<String> {
        let attr = self.find_attribute(ATTRIBUTE_FILENAME, FILENAME_ATTRIBUTE_HEADER)?;
        let length = bytes::le_u16(attr, 4).ok()? as usize;
        if length > attr.len() - FILENAME_ATTRIBUTE_HEADER {
            return None;
        }
        // UTF-8 by convention, but nothing on disk enforces it.
        Some(String::from_utf8_lossy(&attr[FILENAME_ATTRIBUTE_HEADER..FILENAME_ATTRIBUTE_HEADER + length]).to_string())
    }

    /// Locate and validate the DATA attribute carrying the node's contents.
    pub fn data_attribute(&self) -> Result<DataAttribute<'_>> {
        let (off, size) = self
            .find_attribute_range(ATTRIBUTE_DATA, DATA_ATTRIBUTE_HEADER)
            .ok_or(EsfsError::BadFs("extents are missing"))?;
        let tail = &self.raw[off..];
        let data_offset = tail[5];
        if data_offset as usize > size {
            return Err(EsfsError::BadFs("data offset is too large"));
        }
        Ok(DataAttribute {
            indirection: tail[4],
            data_offset,
            count: bytes::le_u16(tail, 6)?,
            size,
            tail,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "identifier": hex(&self.identifier),
            "parent": hex(&self.parent),
            "content_type": hex(&self.content_type),
            "checksum": format!("0x{:08x}", self.checksum),
            "node_type": self.node_type,
            "attribute_count": self.attribute_count,
            "file_size": self.file_size,
            "creation_time": format_time(self.creation_time),
            "access_time": format_time(self.access_time),
            "modification_time": format_time(self.modification_time),
            "filename": self.filename(),
        })
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("identifier", &hex(&self.identifier))
            .field("node_type", &self.node_type)
            .field("attribute_offset", &self.attribute_offset)
            .field("attribute_count", &self.attribute_count)
            .field("file_size", &self.file_size)
            .field("filename", &self.filename())
            .finish()
    }
}

fn hex(id: &[u8; 16]) -> String {
    id.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Render a µs-since-epoch timestamp as RFC 3339.
pub fn format_time(micros: u64) -> String {
    let secs = (micros / 1_000_000) as i64;
    let nsec = ((micros % 1_000_000) * 1000) as u32;
    Utc.timestamp_opt(secs, nsec)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
