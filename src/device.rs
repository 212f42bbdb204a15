use std::io::{self, Read, Seek, SeekFrom};

use log::debug;

use crate::error::Result;

/// The body exposes fixed 512-byte sectors; the filesystem block size is a
/// multiple of this.
pub const SECTOR_SIZE: u64 = 512;

/// Per-read notification, called once for every physical read the driver
/// issues: `(sector, offset_in_sector, len)`.
pub type ReadHook<'a> = &'a mut dyn FnMut(u64, u32, usize);

/// Sector-granular view over any `Read + Seek` body.
///
/// `start` is the byte offset of the volume inside the body, so a partition
/// window is just a non-zero start; every sector number the driver uses is
/// volume-relative.
pub struct BlockDevice<T: Read + Seek> {
    body: T,
    start: u64,
}

impl<T: Read + Seek> BlockDevice<T> {
    pub fn new(body: T, start: u64) -> Self {
        BlockDevice { body, start }
    }

    /// Fill `buf` from the volume at `sector * 512 + offset_in_sector`.
    ///
    /// The hook, when supplied, fires after the bytes have been read. It is
    /// scoped to this one call, so it can never be observed installed once
    /// the read returns.
    pub fn read<'a, 'b>(
        &mut self,
        sector: u64,
        offset_in_sector: u32,
        buf: &mut [u8],
        hook: Option<&'b mut (dyn FnMut(u64, u32, usize) + 'a)>,
    ) -> Result<()> {
        let pos = sector
            .checked_mul(SECTOR_SIZE)
            .and_then(|p| p.checked_add(offset_in_sector as u64))
            .and_then(|p| p.checked_add(self.start))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "read beyond the end of the device")
            })?;
        debug!(
            "device read: sector {} offset {} len {}",
            sector,
            offset_in_sector,
            buf.len()
        );
        self.body.seek(SeekFrom::Start(pos))?;
        self.body.read_exact(buf)?;
        if let Some(hook) = hook {
            hook(sector, offset_in_sector, buf.len());
        }
        Ok(())
    }
}
