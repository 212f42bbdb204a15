use std::io::Cursor;

use exhume_esfs::direntry::{
    ATTRIBUTE_DATA, ATTRIBUTE_FILENAME, DIRENTRY_SIGNATURE, INDIRECTION_DIRECT, INDIRECTION_L1,
    NODE_TYPE_DIRECTORY, NODE_TYPE_FILE,
};
use exhume_esfs::superblock::ESFS_SIGNATURE;
use exhume_esfs::{EsFS, EsfsError, FileType};

const B: u64 = 4096;
const SECTORS_PER_BLOCK: u64 = B / 512;

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

fn attr(atype: u16, payload: &[u8]) -> Vec<u8> {
    let size = align8(4 + payload.len());
    let mut bytes = vec![0u8; size];
    bytes[..2].copy_from_slice(&atype.to_le_bytes());
    bytes[2..4].copy_from_slice(&(size as u16).to_le_bytes());
    bytes[4..4 + payload.len()].copy_from_slice(payload);
    bytes
}

fn filename_attr(name: &str) -> Vec<u8> {
    let mut payload = vec![0u8; 4 + name.len()];
    payload[..2].copy_from_slice(&(name.len() as u16).to_le_bytes());
    payload[4..].copy_from_slice(name.as_bytes());
    attr(ATTRIBUTE_FILENAME, &payload)
}

fn data_direct(data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 28 + data.len()];
    payload[0] = INDIRECTION_DIRECT;
    payload[1] = 32;
    payload[2..4].copy_from_slice(&(data.len() as u16).to_le_bytes());
    payload[28..].copy_from_slice(data);
    attr(ATTRIBUTE_DATA, &payload)
}

// One-byte start deltas and block counts are enough for test volumes. The
// attribute is sized so the record stream fits the driver's byte budget.
fn data_l1(extents: &[(i8, u8)]) -> Vec<u8> {
    let mut records = Vec::new();
    for (delta, count) in extents {
        records.push(0u8);
        records.push(*delta as u8);
        records.push(*count);
    }
    let size = align8(64 + records.len());
    let mut bytes = vec![0u8; size];
    bytes[..2].copy_from_slice(&ATTRIBUTE_DATA.to_le_bytes());
    bytes[2..4].copy_from_slice(&(size as u16).to_le_bytes());
    bytes[4] = INDIRECTION_L1;
    bytes[5] = 32;
    bytes[6..8].copy_from_slice(&(extents.len() as u16).to_le_bytes());
    bytes[32..32 + records.len()].copy_from_slice(&records);
    bytes
}

fn direntry(node_type: u8, file_size: u64, attrs: &[Vec<u8>]) -> Vec<u8> {
    let mut entry = vec![0u8; 1024];
    entry[..8].copy_from_slice(DIRENTRY_SIGNATURE);
    for i in 0..16 {
        entry[8 + i] = 0x40 + i as u8;
    }
    entry[28..30].copy_from_slice(&96u16.to_le_bytes());
    entry[30] = node_type;
    entry[31] = attrs.len() as u8;
    entry[48..56].copy_from_slice(&1_700_000_000_000_000u64.to_le_bytes());
    entry[56..64].copy_from_slice(&file_size.to_le_bytes());
    let mut off = 96;
    for a in attrs {
        entry[off..off + a.len()].copy_from_slice(a);
        off += a.len();
    }
    entry
}

struct Image {
    bytes: Vec<u8>,
}

impl Image {
    // Superblock at sector 16, root entry at block 1, kernel entry pointing
    // at the first slot of the root directory's data block.
    fn new(blocks: u64) -> Self {
        let mut bytes = vec![0u8; (blocks * B) as usize];
        let sb = 8192;
        bytes[sb..sb + 16].copy_from_slice(ESFS_SIGNATURE);
        bytes[sb + 16..sb + 26].copy_from_slice(b"Essence HD");
        bytes[sb + 48..sb + 50].copy_from_slice(&1u16.to_le_bytes());
        bytes[sb + 64..sb + 72].copy_from_slice(&B.to_le_bytes());
        bytes[sb + 72..sb + 80].copy_from_slice(&blocks.to_le_bytes());
        for i in 0..16 {
            bytes[sb + 136 + i] = 0xA0 + i as u8;
        }
        bytes[sb + 184..sb + 192].copy_from_slice(&4u64.to_le_bytes());
        bytes[sb + 200..sb + 208].copy_from_slice(&1u64.to_le_bytes());
        Image { bytes }
    }

    fn put(&mut self, block: u64, offset: usize, data: &[u8]) {
        let base = (block * B) as usize + offset;
        self.bytes[base..base + data.len()].copy_from_slice(data);
    }

    fn fill_block(&mut self, block: u64, value: u8) {
        let base = (block * B) as usize;
        for b in &mut self.bytes[base..base + B as usize] {
            *b = value;
        }
    }

    fn mount(self) -> EsFS<Cursor<Vec<u8>>> {
        EsFS::new(Cursor::new(self.bytes), 0).unwrap()
    }
}

// Root directory with four slots in block 4: a DIRECT file, an extent file
// spread over blocks 5/7/17, a subdirectory and a file with a bogus
// indirection value.
fn standard_image() -> Image {
    let mut img = Image::new(20);
    img.put(
        1,
        0,
        &direntry(NODE_TYPE_DIRECTORY, 4 * 1024, &[data_l1(&[(4, 1)])]),
    );
    img.put(
        4,
        0,
        &direntry(
            NODE_TYPE_FILE,
            5,
            &[filename_attr("hello"), data_direct(b"world")],
        ),
    );
    img.put(
        4,
        1024,
        &direntry(
            NODE_TYPE_FILE,
            3 * B,
            &[filename_attr("big"), data_l1(&[(5, 1), (2, 1), (10, 1)])],
        ),
    );
    img.put(
        4,
        2048,
        &direntry(NODE_TYPE_DIRECTORY, 0, &[filename_attr("sub"), data_l1(&[])]),
    );
    let mut bogus = data_direct(b"x");
    bogus[4] = 7;
    img.put(
        4,
        3072,
        &direntry(NODE_TYPE_FILE, 1, &[filename_attr("weird"), bogus]),
    );
    img.fill_block(5, 0x11);
    img.fill_block(7, 0x22);
    img.fill_block(17, 0x33);
    img
}

#[test]
fn direct_file_reads_from_the_entry_without_device_io() {
    let mut fs = standard_image().mount();
    let mut file = fs.open("/hello").unwrap();
    assert_eq!(file.size(), 5);

    let mut reads = 0u32;
    let mut hook = |_: u64, _: u32, _: usize| reads += 1;
    let mut buf = [0u8; 16];
    let n = fs.read_with_hook(&mut file, &mut buf, &mut hook).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf[..5], b"world");
    assert_eq!(reads, 0);

    // The cursor sits at end of file now.
    assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 0);
}

#[test]
fn corrupt_superblock_signature_fails_the_mount() {
    let mut img = standard_image();
    img.bytes[8192] = b'X';
    match EsFS::new(Cursor::new(img.bytes), 0) {
        Err(EsfsError::BadFs("not an esfs filesystem")) => {}
        other => panic!("unexpected mount result: {:?}", other.err()),
    }
}

#[test]
fn a_body_too_short_for_the_superblock_reads_as_not_esfs() {
    match EsFS::new(Cursor::new(vec![0u8; 1000]), 0) {
        Err(EsfsError::BadFs("not an esfs filesystem")) => {}
        other => panic!("unexpected mount result: {:?}", other.err()),
    }
}

#[test]
fn a_corrupt_root_entry_fails_the_mount() {
    let mut img = standard_image();
    img.put(1, 0, &[0u8; 1024]);
    match EsFS::new(Cursor::new(img.bytes), 0) {
        Err(EsfsError::BadFs("incorrect directory signature")) => {}
        other => panic!("unexpected mount result: {:?}", other.err()),
    }
}

#[test]
fn extent_reads_land_on_the_right_blocks() {
    let mut fs = standard_image().mount();
    let mut file = fs.open("/big").unwrap();

    let mut reads = Vec::new();
    let mut hook = |sector: u64, offset: u32, len: usize| reads.push((sector, offset, len));
    let mut buf = vec![0u8; (3 * B) as usize];
    let n = fs.read_with_hook(&mut file, &mut buf, &mut hook).unwrap();

    assert_eq!(n, (3 * B) as usize);
    assert_eq!(
        reads,
        vec![
            (5 * SECTORS_PER_BLOCK, 0, B as usize),
            (7 * SECTORS_PER_BLOCK, 0, B as usize),
            (17 * SECTORS_PER_BLOCK, 0, B as usize),
        ]
    );
    assert!(buf[..B as usize].iter().all(|b| *b == 0x11));
    assert!(buf[B as usize..2 * B as usize].iter().all(|b| *b == 0x22));
    assert!(buf[2 * B as usize..].iter().all(|b| *b == 0x33));
}

#[test]
fn split_reads_match_a_single_read() {
    let mut fs = standard_image().mount();

    let node = fs.open("/big").unwrap();
    let mut whole = vec![0u8; (3 * B) as usize];
    fs.read_node(node.node(), 0, &mut whole, None).unwrap();

    let mut file = fs.open("/big").unwrap();
    let mut first = vec![0u8; 1000];
    let mut rest = vec![0u8; (3 * B) as usize];
    let n1 = fs.read(&mut file, &mut first).unwrap();
    let n2 = fs.read(&mut file, &mut rest).unwrap();

    assert_eq!(n1, 1000);
    assert_eq!(n2, (3 * B) as usize - 1000);
    assert_eq!(&whole[..1000], &first[..]);
    assert_eq!(&whole[1000..], &rest[..n2]);
    assert_eq!(fs.read(&mut file, &mut rest).unwrap(), 0);
}

#[test]
fn listing_skips_corrupt_slots() {
    let mut img = Image::new(8);
    img.put(
        1,
        0,
        &direntry(NODE_TYPE_DIRECTORY, 3 * 1024, &[data_l1(&[(4, 1)])]),
    );
    img.put(
        4,
        0,
        &direntry(NODE_TYPE_FILE, 0, &[filename_attr("a"), data_direct(b"")]),
    );
    img.put(4, 1024, &[0xFFu8; 1024]);
    img.put(
        4,
        2048,
        &direntry(NODE_TYPE_DIRECTORY, 0, &[filename_attr("sub"), data_l1(&[])]),
    );

    let mut fs = img.mount();
    let records = fs.list_dir("/").unwrap();
    let names: Vec<_> = records
        .iter()
        .map(|r| (r.name.as_str(), r.file_type))
        .collect();
    assert_eq!(
        names,
        vec![("a", FileType::Regular), ("sub", FileType::Directory)]
    );
}

#[test]
fn an_unknown_indirection_is_a_bad_fs() {
    let mut fs = standard_image().mount();
    let mut file = fs.open("/weird").unwrap();
    let mut buf = [0u8; 4];
    match fs.read(&mut file, &mut buf) {
        Err(EsfsError::BadFs("unknown redirection")) => {}
        other => panic!("unexpected read result: {:?}", other.err()),
    }
}

#[test]
fn an_oversized_directory_is_rejected() {
    let mut img = Image::new(8);
    img.put(
        1,
        0,
        &direntry(NODE_TYPE_DIRECTORY, 0x8000_0000, &[data_l1(&[(4, 1)])]),
    );
    let mut fs = img.mount();
    match fs.list_dir("/") {
        Err(EsfsError::BadFs("directory too large")) => {}
        other => panic!("unexpected list result: {:?}", other.err()),
    }
}

#[test]
fn a_truncated_extent_list_returns_the_bytes_before_it() {
    // Two extents declared, but the attribute's byte budget admits only the
    // first record.
    let mut img = Image::new(8);
    let mut data = data_l1(&[(5, 1), (2, 1)]);
    data[2..4].copy_from_slice(&68u16.to_le_bytes());
    img.put(
        1,
        0,
        &direntry(NODE_TYPE_DIRECTORY, 2 * 1024, &[data_l1(&[(4, 1)])]),
    );
    img.put(
        4,
        0,
        &direntry(NODE_TYPE_FILE, 2 * B, &[filename_attr("torn"), data]),
    );
    img.fill_block(5, 0x55);

    let mut fs = img.mount();
    let mut file = fs.open("/torn").unwrap();
    let mut buf = vec![0u8; (2 * B) as usize];
    let n = fs.read(&mut file, &mut buf).unwrap();
    assert_eq!(n, B as usize);
    assert!(buf[..n].iter().all(|b| *b == 0x55));
}

#[test]
fn negative_extent_deltas_walk_backwards() {
    let mut img = Image::new(8);
    img.put(
        1,
        0,
        &direntry(NODE_TYPE_DIRECTORY, 1024, &[data_l1(&[(4, 1)])]),
    );
    img.put(
        4,
        0,
        &direntry(
            NODE_TYPE_FILE,
            2 * B,
            &[filename_attr("back"), data_l1(&[(7, 1), (-2, 1)])],
        ),
    );
    img.fill_block(7, 0x66);
    img.fill_block(5, 0x44);

    let mut fs = img.mount();
    let node = fs.find_node("/back", FileType::Regular).unwrap();
    let mut reads = Vec::new();
    let mut hook = |sector: u64, _: u32, _: usize| reads.push(sector);
    let mut buf = vec![0u8; (2 * B) as usize];
    let n = fs
        .read_node(&node, 0, &mut buf, Some(&mut hook))
        .unwrap();
    assert_eq!(n, (2 * B) as usize);
    assert_eq!(reads, vec![7 * SECTORS_PER_BLOCK, 5 * SECTORS_PER_BLOCK]);
    assert!(buf[..B as usize].iter().all(|b| *b == 0x66));
    assert!(buf[B as usize..].iter().all(|b| *b == 0x44));
}

#[test]
fn type_mismatches_surface_as_bad_file_type() {
    let mut fs = standard_image().mount();
    match fs.list_dir("/hello") {
        Err(EsfsError::BadFileType("not a directory")) => {}
        other => panic!("unexpected list result: {:?}", other.err()),
    }
    match fs.open("/sub") {
        Err(EsfsError::BadFileType("not a regular file")) => {}
        other => panic!("unexpected open result: {:?}", other.err()),
    }
}

#[test]
fn missing_paths_are_not_found() {
    let mut fs = standard_image().mount();
    assert!(matches!(
        fs.open("/nope"),
        Err(EsfsError::NotFound(_))
    ));
    assert!(matches!(
        fs.open("/sub/deeper"),
        Err(EsfsError::NotFound(_))
    ));
}

#[test]
fn label_and_uuid_round_trip_the_superblock() {
    let fs = standard_image().mount();
    assert_eq!(fs.label(), "Essence HD");

    let uuid = fs.uuid();
    assert_eq!(uuid, "a0a1a2a3a4a5a6a7a8a9aaabacadaeaf");
    let decoded: Vec<u8> = (0..16)
        .map(|i| u8::from_str_radix(&uuid[2 * i..2 * i + 2], 16).unwrap())
        .collect();
    assert_eq!(decoded, fs.superblock.identifier);
}

#[test]
fn the_kernel_entry_is_reachable_from_the_superblock() {
    let mut fs = standard_image().mount();
    let mut kernel = fs.open_kernel().unwrap();
    let mut buf = [0u8; 8];
    let n = fs.read(&mut kernel, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"world");
}

#[test]
fn reads_at_or_past_the_file_size_return_zero() {
    let mut fs = standard_image().mount();
    let node = fs.find_node("/hello", FileType::Regular).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(fs.read_node(&node, 5, &mut buf, None).unwrap(), 0);
    assert_eq!(fs.read_node(&node, 500, &mut buf, None).unwrap(), 0);
}
