use prettytable::{Cell, Row, Table};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::bytes;
use crate::error::{EsfsError, Result};

/// The signature in the superblock.
pub const ESFS_SIGNATURE: &[u8; 16] = b"!EssenceFS2-----";
/// The superblock occupies 8192 bytes at sector 16 of the volume.
pub const SUPERBLOCK_SIZE: usize = 8192;
pub const SUPERBLOCK_SECTOR: u64 = 16;
/// Volumes whose `requiredReadVersion` exceeds this cannot be read.
pub const DRIVER_VERSION: u16 = 10;
pub const VOLUME_NAME_LENGTH: usize = 32;

// Bits a valid block size may carry: multiples of 512 that do not overflow
// an int32. Anything outside the mask is rejected at mount.
const BLOCK_SIZE_MASK: u64 = 0x0FFF_FE00;

/// Location of a directory entry on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DirEntryRef {
    // The block containing the directory entry.
    pub block: u64,
    // Offset into the block to find the directory entry.
    pub offset_into_block: u32,
}

impl DirEntryRef {
    fn from_bytes(data: &[u8], offset: usize) -> Result<Self> {
        Ok(DirEntryRef {
            block: bytes::le_u64(data, offset)?,
            offset_into_block: bytes::le_u32(data, offset + 8)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Superblock {
    pub volume_name: [u8; VOLUME_NAME_LENGTH],
    pub required_read_version: u16,
    pub required_write_version: u16,
    // CRC-32 of the superblock; parsed, never verified.
    pub checksum: u32,
    // Non-zero when the volume was not cleanly unmounted; ignored.
    pub mounted: u8,
    pub block_size: u64,
    pub block_count: u64,
    pub blocks_used: u64,
    pub blocks_per_group: u32,
    pub group_count: u64,
    pub blocks_per_group_block_bitmap: u64,
    pub gdt_first_block: u64,
    pub directory_entries_per_block: u64,
    pub identifier: [u8; 16],
    pub os_installation: [u8; 16],
    pub next_identifier: [u8; 16],
    // The kernel's directory entry, for convenient access by the bootloader.
    pub kernel: DirEntryRef,
    pub root: DirEntryRef,
}

impl Superblock {
    /// Parse and validate the 8192-byte superblock region.
    ///
    /// Any structural problem (wrong signature, too-new read version, a
    /// block size that is zero, not a multiple of 512 or over the ceiling,
    /// or an empty volume) yields the uniform mount failure.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < SUPERBLOCK_SIZE {
            return Err(EsfsError::BadFs("not an esfs filesystem"));
        }
        let le_u16 = |off| bytes::le_u16(data, off);
        let le_u32 = |off| bytes::le_u32(data, off);
        let le_u64 = |off| bytes::le_u64(data, off);

        if bytes::take(data, 0, 16)? != ESFS_SIGNATURE {
            return Err(EsfsError::BadFs("not an esfs filesystem"));
        }

        let mut volume_name = [0u8; VOLUME_NAME_LENGTH];
        volume_name.copy_from_slice(bytes::take(data, 16, VOLUME_NAME_LENGTH)?);

        let required_read_version = le_u16(48)?;
        if required_read_version > DRIVER_VERSION {
            return Err(EsfsError::BadFs("not an esfs filesystem"));
        }

        let block_size = le_u64(64)?;
        let block_count = le_u64(72)?;
        if block_size == 0 || block_size & !BLOCK_SIZE_MASK != 0 || block_count == 0 {
            return Err(EsfsError::BadFs("not an esfs filesystem"));
        }

        Ok(Superblock {
            volume_name,
            required_read_version,
            required_write_version: le_u16(50)?,
            checksum: le_u32(52)?,
            mounted: data[56],
            block_size,
            block_count,
            blocks_used: le_u64(80)?,
            blocks_per_group: le_u32(88)?,
            group_count: le_u64(96)?,
            blocks_per_group_block_bitmap: le_u64(104)?,
            gdt_first_block: le_u64(112)?,
            directory_entries_per_block: le_u64(120)?,
            identifier: bytes::id16(data, 136)?,
            os_installation: bytes::id16(data, 152)?,
            next_identifier: bytes::id16(data, 168)?,
            kernel: DirEntryRef::from_bytes(data, 184)?,
            root: DirEntryRef::from_bytes(data, 200)?,
        })
    }

    /// The volume label: `volume_name` up to its first NUL.
    pub fn label(&self) -> String {
        let end = self
            .volume_name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(VOLUME_NAME_LENGTH);
        String::from_utf8_lossy(&self.volume_name[..end]).to_string()
    }

    /// The volume UUID as 32 lowercase hex digits, no hyphens.
    pub fn uuid(&self) -> String {
        self.identifier.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn sectors_per_block(&self) -> u64 {
        self.block_size >> 9
    }

    pub fn to_json(&self) -> Value {
        json!({
            "label": self.label(),
            "uuid": self.uuid(),
            "required_read_version": self.required_read_version,
            "required_write_version": self.required_write_version,
            "checksum": format!("0x{:08x}", self.checksum),
            "mounted": self.mounted != 0,
            "block_size": self.block_size,
            "block_count": self.block_count,
            "blocks_used": self.blocks_used,
            "blocks_per_group": self.blocks_per_group,
            "group_count": self.group_count,
            "gdt_first_block": self.gdt_first_block,
            "directory_entries_per_block": self.directory_entries_per_block,
            "root": { "block": self.root.block, "offset": self.root.offset_into_block },
            "kernel": { "block": self.kernel.block, "offset": self.kernel.offset_into_block },
        })
    }

    /// String representation of the superblock using prettytable.
    pub fn to_table(&self) -> String {
        let mut table = Table::new();
        table.add_row(Row::new(vec![Cell::new("Label"), Cell::new(&self.label())]));
        table.add_row(Row::new(vec![Cell::new("UUID"), Cell::new(&self.uuid())]));
        table.add_row(Row::new(vec![
            Cell::new("Read Version"),
            Cell::new(&format!("{}", self.required_read_version)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Write Version"),
            Cell::new(&format!("{}", self.required_write_version)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Mounted"),
            Cell::new(&format!("{}", self.mounted != 0)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Block Size"),
            Cell::new(&format!("{}", self.block_size)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Block Count"),
            Cell::new(&format!("{}", self.block_count)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Blocks Used"),
            Cell::new(&format!("{}", self.blocks_used)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Blocks / Group"),
            Cell::new(&format!("{}", self.blocks_per_group)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Group Count"),
            Cell::new(&format!("{}", self.group_count)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("GDT First Block"),
            Cell::new(&format!("{}", self.gdt_first_block)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Dir Entries / Block"),
            Cell::new(&format!("{}", self.directory_entries_per_block)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Root Entry"),
            Cell::new(&format!(
                "block {} offset {}",
                self.root.block, self.root.offset_into_block
            )),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Kernel Entry"),
            Cell::new(&format!(
                "block {} offset {}",
                self.kernel.block, self.kernel.offset_into_block
            )),
        ]));
        table.to_string()
    }
}
