use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail, ensure};
use memmap2::{Mmap, MmapOptions};

const MAGIC: &[u8; 4] = b"RXAR";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind(pub [u8; 4]);

impl ResourceKind {
    pub const CARD: ResourceKind = ResourceKind(*b"CARD");
    pub const NAME: ResourceKind = ResourceKind(*b"NAME");

    pub fn as_str(self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub kind: ResourceKind,
    pub id: u32,
    pub offset: u64,
    pub size: u32,
}

impl ArchiveEntry {
    pub fn data_range(&self) -> Range<usize> {
        let start = self.offset as usize;
        let end = start + self.size as usize;
        start..end
    }
}

/// Read-only view over a memory-mapped `.rxa` stack archive.
#[derive(Debug)]
pub struct RxArchive {
    path: PathBuf,
    mmap: Mmap,
    entries: Vec<ArchiveEntry>,
}

impl RxArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let file = File::open(&path_buf)
            .with_context(|| format!("opening stack archive at {}", path_buf.display()))?;
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .with_context(|| format!("memory-mapping stack archive {}", path_buf.display()))?;

        let entries = parse_entries(&mmap)
            .with_context(|| format!("parsing stack archive {}", path_buf.display()))?;

        Ok(RxArchive {
            path: path_buf,
            mmap,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn find_entry(&self, kind: ResourceKind, id: u32) -> Option<&ArchiveEntry> {
        self.entries
            .iter()
            .find(|entry| entry.kind == kind && entry.id == id)
    }

    pub fn ids(&self, kind: ResourceKind) -> impl Iterator<Item = u32> + '_ {
        self.entries
            .iter()
            .filter(move |entry| entry.kind == kind)
            .map(|entry| entry.id)
    }

    pub fn read_entry_bytes(&self, entry: &ArchiveEntry) -> &[u8] {
        &self.mmap[entry.data_range()]
    }

    pub fn read_resource(&self, kind: ResourceKind, id: u32) -> Option<&[u8]> {
        self.find_entry(kind, id)
            .map(|entry| self.read_entry_bytes(entry))
    }
}

fn parse_entries(mmap: &Mmap) -> Result<Vec<ArchiveEntry>> {
    ensure!(
        mmap.len() >= HEADER_SIZE,
        "stack archive is too small to contain a header"
    );

    let header = &mmap[..HEADER_SIZE];
    if &header[0..4] != MAGIC {
        bail!("stack archive missing RXAR signature");
    }

    let version = read_u32(header, 4);
    ensure!(version == VERSION, "unsupported stack archive version {version}");
    let entry_count = read_u32(header, 8) as usize;

    let table_len = entry_count
        .checked_mul(ENTRY_SIZE)
        .ok_or_else(|| anyhow!("stack archive entry count overflow"))?;
    ensure!(
        HEADER_SIZE + table_len <= mmap.len(),
        "stack archive truncated before end of entry table"
    );

    let table = &mmap[HEADER_SIZE..HEADER_SIZE + table_len];
    let mut entries = Vec::with_capacity(entry_count);
    for index in 0..entry_count {
        let raw = &table[index * ENTRY_SIZE..(index + 1) * ENTRY_SIZE];
        let kind = ResourceKind([raw[0], raw[1], raw[2], raw[3]]);
        let id = read_u32(raw, 4);
        let offset = read_u32(raw, 8) as usize;
        let size = read_u32(raw, 12);

        let end = offset
            .checked_add(size as usize)
            .ok_or_else(|| anyhow!("stack archive entry {index} size overflow"))?;
        ensure!(
            end <= mmap.len(),
            "stack archive entry {index} data extends beyond file"
        );

        entries.push(ArchiveEntry {
            kind,
            id,
            offset: offset as u64,
            size,
        });
    }

    Ok(entries)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Accumulates resources and lays them out as an `.rxa` archive.
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    resources: Vec<(ResourceKind, u32, Vec<u8>)>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ResourceKind, id: u32, data: Vec<u8>) -> &mut Self {
        self.resources.push((kind, id, data));
        self
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let count = u32::try_from(self.resources.len())
            .context("too many resources for one stack archive")?;
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        let mut offset = HEADER_SIZE + self.resources.len() * ENTRY_SIZE;
        for (kind, id, data) in &self.resources {
            let size = u32::try_from(data.len()).context("resource larger than 4 GiB")?;
            let start = u32::try_from(offset).context("stack archive larger than 4 GiB")?;
            out.extend_from_slice(&kind.0);
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&start.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            offset += data.len();
        }
        for (_, _, data) in &self.resources {
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    pub fn write_to<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        let mut file = File::create(dest.as_ref())
            .with_context(|| format!("creating {}", dest.as_ref().display()))?;
        file.write_all(&bytes)
            .with_context(|| format!("writing {}", dest.as_ref().display()))?;
        Ok(())
    }
}
