//! Synthetic BAM/BAI files for integration tests.
#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bamtail::bgzf::compress;
use bamtail::index::{BAI_MAGIC, METADATA_BIN};
use bamtail::{
    build_container, read_block, write_container, Block, ContainerHeader, Records, Reference,
    VirtualOffset,
};
use tempfile::TempDir;

pub const UNMAPPED: u16 = 0x4;
pub const QC_FAIL: u16 = 0x200;

const BASES: [u8; 4] = [1, 2, 4, 8]; // A C G T in 4-bit encoding

/// Alignment record with `seq_len` bases; placed records get a single `M` CIGAR op.
pub fn record(name: &str, flag: u16, ref_id: i32, pos: i32, seq_len: usize) -> Vec<u8> {
    let placed = ref_id >= 0;

    let mut body = Vec::new();
    body.extend_from_slice(&ref_id.to_le_bytes());
    body.extend_from_slice(&pos.to_le_bytes());
    body.push((name.len() + 1) as u8);
    body.push(if placed { 60 } else { 0 });
    body.extend_from_slice(&4680u16.to_le_bytes());
    body.extend_from_slice(&u16::from(placed).to_le_bytes());
    body.extend_from_slice(&flag.to_le_bytes());
    body.extend_from_slice(&(seq_len as u32).to_le_bytes());
    body.extend_from_slice(&(-1i32).to_le_bytes());
    body.extend_from_slice(&(-1i32).to_le_bytes());
    body.extend_from_slice(&0i32.to_le_bytes());
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    if placed {
        body.extend_from_slice(&((seq_len as u32) << 4).to_le_bytes());
    }
    for i in (0..seq_len).step_by(2) {
        let high = BASES[i % 4] << 4;
        let low = if i + 1 < seq_len { BASES[(i + 1) % 4] } else { 0 };
        body.push(high | low);
    }
    body.extend(std::iter::repeat(30u8).take(seq_len));

    let mut out = (body.len() as i32).to_le_bytes().to_vec();
    out.extend(body);
    out
}

pub fn header() -> ContainerHeader {
    ContainerHeader::new(
        "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:1000000\n",
        vec![Reference::new("chr1", 1_000_000)],
    )
}

/// Virtual offset of decompressed position `pos` in a BGZF buffer.
pub fn virtual_offset_at(bgzf: &[u8], pos: usize) -> VirtualOffset {
    let mut source = Cursor::new(bgzf);
    let mut coffset = 0;
    let mut seen = 0;
    loop {
        match read_block(&mut source, coffset).unwrap() {
            Some(Block::Data { data, next_offset }) => {
                if pos < seen + data.len() {
                    return VirtualOffset::new(coffset, (pos - seen) as u16);
                }
                seen += data.len();
                coffset = next_offset;
            }
            _ => return VirtualOffset::new(coffset, 0),
        }
    }
}

/// One-reference index whose chunk ends at `tail`, with pseudo-bin counts.
pub fn bai(first: VirtualOffset, tail: VirtualOffset, mapped: u64, unplaced: u64) -> Vec<u8> {
    let mut out = BAI_MAGIC.to_vec();
    out.extend_from_slice(&1i32.to_le_bytes());

    out.extend_from_slice(&2i32.to_le_bytes());
    out.extend_from_slice(&4681u32.to_le_bytes());
    out.extend_from_slice(&1i32.to_le_bytes());
    out.extend_from_slice(&first.as_raw().to_le_bytes());
    out.extend_from_slice(&tail.as_raw().to_le_bytes());

    out.extend_from_slice(&METADATA_BIN.to_le_bytes());
    out.extend_from_slice(&2i32.to_le_bytes());
    out.extend_from_slice(&first.as_raw().to_le_bytes());
    out.extend_from_slice(&tail.as_raw().to_le_bytes());
    out.extend_from_slice(&mapped.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());

    out.extend_from_slice(&1i32.to_le_bytes());
    out.extend_from_slice(&first.as_raw().to_le_bytes());

    out.extend_from_slice(&unplaced.to_le_bytes());
    out
}

/// Index with no references, hence no chunks.
pub fn empty_bai() -> Vec<u8> {
    let mut out = BAI_MAGIC.to_vec();
    out.extend_from_slice(&0i32.to_le_bytes());
    out
}

/// Coordinate-sorted BAM on disk: `mapped` placed reads, then one unplaced read per tail flag.
pub struct Fixture {
    pub dir: TempDir,
    pub bam: PathBuf,
    pub bai: PathBuf,
    pub tail: VirtualOffset,
    pub tail_names: Vec<String>,
}

impl Fixture {
    pub fn new(mapped: usize, tail_flags: &[u16], seq_len: usize) -> Self {
        let mut data = build_container(&header(), &[]);
        let first_record = data.len();

        for i in 0..mapped {
            data.extend(record(&format!("mapped{i}"), 0, 0, (i * 100) as i32, seq_len));
        }
        let tail_start = data.len();

        let mut tail_names = Vec::new();
        for (i, &flag) in tail_flags.iter().enumerate() {
            let name = format!("tail{i}");
            data.extend(record(&name, flag, -1, -1, seq_len));
            tail_names.push(name);
        }

        let bgzf = compress(&data, 6).unwrap();
        let first = virtual_offset_at(&bgzf, first_record);
        let tail = virtual_offset_at(&bgzf, tail_start);

        let dir = tempfile::tempdir().unwrap();
        let bam = dir.path().join("sample.bam");
        let bai_path = dir.path().join("sample.bam.bai");
        fs::write(&bam, &bgzf).unwrap();
        fs::write(&bai_path, bai(first, tail, mapped as u64, tail_flags.len() as u64)).unwrap();

        Self {
            dir,
            bam,
            bai: bai_path,
            tail,
            tail_names,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Write a BAM of placed reads standing in for a region query result.
pub fn write_region(path: &Path, count: usize) {
    let raw: Vec<u8> = (0..count)
        .flat_map(|i| record(&format!("region{i}"), 0, 0, (i * 10) as i32, 50))
        .collect();
    let records = Records::parse(raw, 0);
    let all: Vec<_> = records.iter().collect();
    write_container(path, &build_container(&header(), &all), 6).unwrap();
}
