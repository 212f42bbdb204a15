use std::io::{Read, Seek};

use log::{debug, info};

pub mod bytes;
pub mod device;
pub mod direntry;
pub mod error;
pub mod extent;
pub mod superblock;

pub use device::{BlockDevice, ReadHook, SECTOR_SIZE};
pub use direntry::DirectoryEntry;
pub use error::{EsfsError, Result};
pub use superblock::Superblock;

use direntry::{DIRENTRY_SIZE, INDIRECTION_DIRECT, INDIRECTION_L1, NODE_TYPE_DIRECTORY, NODE_TYPE_FILE};
use extent::ExtentDecoder;
use superblock::DirEntryRef;

/// The name this filesystem driver goes by.
pub const FS_NAME: &str = "esfs";

// Directories at or above 2^31 bytes are rejected outright.
const DIRECTORY_SIZE_LIMIT: u64 = 0x8000_0000;

/// Node classification handed to directory visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

/// An in-memory node: a parsed directory entry from the mounted volume.
#[derive(Debug, Clone)]
pub struct Node {
    pub entry: DirectoryEntry,
}

/// An open regular file with a read cursor.
#[derive(Debug)]
pub struct FileHandle {
    node: Node,
    offset: u64,
}

impl FileHandle {
    pub fn size(&self) -> u64 {
        self.node.entry.file_size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn node(&self) -> &Node {
        &self.node
    }
}

/// One record of a directory listing.
#[derive(Debug)]
pub struct DirRecord {
    pub name: String,
    pub file_type: FileType,
    pub node: Node,
}

/// A mounted ESFS volume over any `Read + Seek` body.
pub struct EsFS<T: Read + Seek> {
    pub superblock: Superblock,
    device: BlockDevice<T>,
    root: Node,
}

impl<T: Read + Seek> EsFS<T> {
    /// Mount the ESFS volume found at byte `offset` inside `body`.
    ///
    /// Reads and validates the superblock, then loads the root directory
    /// entry it points at. I/O failures here are reported as
    /// "not an esfs filesystem": probing a partition that belongs to some
    /// other filesystem should look the same as a bad signature.
    pub fn new(body: T, offset: u64) -> Result<Self> {
        let mut device = BlockDevice::new(body, offset);

        let mut sb_buf = vec![0u8; superblock::SUPERBLOCK_SIZE];
        device
            .read(superblock::SUPERBLOCK_SECTOR, 0, &mut sb_buf, None)
            .map_err(not_esfs)?;
        let sblock = Superblock::from_bytes(&sb_buf)?;

        let mut slot = [0u8; DIRENTRY_SIZE];
        let sector = sblock.root.block.wrapping_mul(sblock.sectors_per_block());
        device
            .read(sector, sblock.root.offset_into_block, &mut slot, None)
            .map_err(not_esfs)?;
        let root = Node {
            entry: DirectoryEntry::from_bytes(&slot)?,
        };

        info!(
            "mounted esfs volume '{}': {} blocks of {} bytes",
            sblock.label(),
            sblock.block_count,
            sblock.block_size
        );
        Ok(EsFS {
            superblock: sblock,
            device,
            root,
        })
    }

    /// The pre-loaded root directory node.
    pub fn root(&self) -> Node {
        self.root.clone()
    }

    pub fn label(&self) -> String {
        self.superblock.label()
    }

    pub fn uuid(&self) -> String {
        self.superblock.uuid()
    }

    /// Read up to `buf.len()` bytes of `node`'s data starting at byte `pos`.
    ///
    /// Returns the number of bytes read; 0 means end of file. Embedded
    /// (DIRECT) data is copied straight out of the entry with no device
    /// I/O; extent (L1) data issues one device read per extent touched.
    /// The hook, when supplied, fires once per physical read on the extent
    /// path and is never left installed when this returns.
    pub fn read_node(
        &mut self,
        node: &Node,
        pos: u64,
        buf: &mut [u8],
        mut hook: Option<ReadHook>,
    ) -> Result<usize> {
        let d = node.entry.data_attribute()?;
        let file_size = node.entry.file_size;
        if pos >= file_size {
            return Ok(0);
        }
        let mut len = buf.len() as u64;
        if len > file_size - pos {
            len = file_size - pos;
        }

        let data_size = (d.size - d.data_offset as usize) as u64;

        if d.indirection == INDIRECTION_DIRECT {
            // Some volumes disagree between the declared byte count and the
            // attribute remainder; the format honours the larger of the two.
            let cap = u64::from(d.count).max(data_size);
            if pos > cap {
                return Ok(0);
            }
            if len > cap - pos {
                len = cap - pos;
            }
            let src = d.data_offset as usize + pos as usize;
            let avail = d.tail.len().saturating_sub(src);
            let n = (len as usize).min(avail);
            buf[..n].copy_from_slice(&d.tail[src..src + n]);
            return Ok(n);
        }
        if d.indirection != INDIRECTION_L1 {
            return Err(EsfsError::BadFs("unknown redirection"));
        }

        let bsize = self.superblock.block_size;
        let sectors_per_block = self.superblock.sectors_per_block();
        let mut decoder = ExtentDecoder::new(d.tail, d.data_offset as usize, data_size as usize);
        let mut already: u64 = 0;
        let mut cur_pos: u64 = 0;
        let mut extnum: u16 = 0;

        while already < len && extnum < d.count {
            // A truncated record ends the read with what we have so far.
            let Some(ext) = decoder.next() else { break };
            extnum += 1;

            let count_bytes = ext.block_count.wrapping_mul(bsize);
            if cur_pos.wrapping_add(count_bytes) <= pos {
                cur_pos = cur_pos.wrapping_add(count_bytes);
                continue;
            }

            let add_off = pos.saturating_sub(cur_pos);
            let mut to_read = len - already;
            let span = count_bytes.wrapping_sub(add_off);
            if to_read > span {
                to_read = span;
            }

            let sector = ext
                .start_block
                .wrapping_mul(sectors_per_block)
                .wrapping_add(add_off >> 9);
            let start = already as usize;
            let end = start + to_read as usize;
            let reborrowed_hook = match hook {
                Some(ref mut h) => Some(&mut **h),
                None => None,
            };
            self.device.read(
                sector,
                (add_off & 0x1FF) as u32,
                &mut buf[start..end],
                reborrowed_hook,
            )?;

            already += to_read;
            cur_pos = cur_pos.wrapping_add(count_bytes);
        }

        Ok(already as usize)
    }

    /// Walk a directory node, invoking `visit` with each child's name,
    /// classification and node.
    ///
    /// A directory is a stream of fixed 1024-byte slots; slots that fail
    /// entry validation are skipped in place, which is how free and corrupt
    /// slots coexist with live ones. Children without a usable filename
    /// attribute or with an unknown node type are skipped the same way.
    /// `visit` returning `true` stops the walk early.
    pub fn iterate_dir<F>(&mut self, dir: &Node, mut visit: F) -> Result<bool>
    where
        F: FnMut(&str, FileType, Node) -> bool,
    {
        if !dir.entry.is_directory() {
            return Err(EsfsError::BadFileType("not a directory"));
        }
        let dir_size = dir.entry.file_size;
        if dir_size >= DIRECTORY_SIZE_LIMIT {
            return Err(EsfsError::BadFs("directory too large"));
        }

        let mut fpos = 0u64;
        while fpos < dir_size {
            let mut slot = [0u8; DIRENTRY_SIZE];
            self.read_node(dir, fpos, &mut slot, None)?;
            fpos += DIRENTRY_SIZE as u64;

            let entry = match DirectoryEntry::from_bytes(&slot) {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            let Some(name) = entry.filename() else { continue };
            let file_type = match entry.node_type {
                NODE_TYPE_DIRECTORY => FileType::Directory,
                NODE_TYPE_FILE => FileType::Regular,
                _ => continue,
            };
            if visit(&name, file_type, Node { entry }) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Resolve a path from the root to a node of the expected type.
    ///
    /// Name comparison is case-sensitive, byte-exact UTF-8. An empty path
    /// (or "/") resolves to the root itself.
    pub fn find_node(&mut self, path: &str, expected: FileType) -> Result<Node> {
        debug!("resolving '{}'", path);
        let mut current = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let mut found: Option<Node> = None;
            self.iterate_dir(&current, |name, _, node| {
                if name == part {
                    found = Some(node);
                    true
                } else {
                    false
                }
            })?;
            current = found.ok_or_else(|| {
                EsfsError::NotFound(format!("path component '{}' not found", part))
            })?;
        }
        match expected {
            FileType::Directory if !current.entry.is_directory() => {
                Err(EsfsError::BadFileType("not a directory"))
            }
            FileType::Regular if !current.entry.is_file() => {
                Err(EsfsError::BadFileType("not a regular file"))
            }
            _ => Ok(current),
        }
    }

    /// Open a regular file by path. The handle releases with its drop.
    pub fn open(&mut self, path: &str) -> Result<FileHandle> {
        let node = self.find_node(path, FileType::Regular)?;
        Ok(FileHandle { node, offset: 0 })
    }

    /// Read from an open file at its cursor, advancing it.
    pub fn read(&mut self, file: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_node(&file.node, file.offset, buf, None)?;
        file.offset += n as u64;
        Ok(n)
    }

    /// Like [`read`](Self::read), but with a per-device-read notification,
    /// the way a bootloader surfaces block-level progress.
    pub fn read_with_hook(
        &mut self,
        file: &mut FileHandle,
        buf: &mut [u8],
        hook: ReadHook,
    ) -> Result<usize> {
        let n = self.read_node(&file.node, file.offset, buf, Some(hook))?;
        file.offset += n as u64;
        Ok(n)
    }

    /// List a directory by path.
    pub fn list_dir(&mut self, path: &str) -> Result<Vec<DirRecord>> {
        let dir = self.find_node(path, FileType::Directory)?;
        let mut records = Vec::new();
        self.iterate_dir(&dir, |name, file_type, node| {
            records.push(DirRecord {
                name: name.to_string(),
                file_type,
                node,
            });
            false
        })?;
        Ok(records)
    }

    /// Open the kernel file whose directory entry the superblock records
    /// for the bootloader's convenience.
    pub fn open_kernel(&mut self) -> Result<FileHandle> {
        let node = self.load_direntry(self.superblock.kernel)?;
        Ok(FileHandle { node, offset: 0 })
    }

    fn load_direntry(&mut self, at: DirEntryRef) -> Result<Node> {
        let mut slot = [0u8; DIRENTRY_SIZE];
        let sector = at.block.wrapping_mul(self.superblock.sectors_per_block());
        self.device
            .read(sector, at.offset_into_block, &mut slot, None)?;
        Ok(Node {
            entry: DirectoryEntry::from_bytes(&slot)?,
        })
    }
}

fn not_esfs(err: EsfsError) -> EsfsError {
    match err {
        EsfsError::Io(_) => EsfsError::BadFs("not an esfs filesystem"),
        other => other,
    }
}
