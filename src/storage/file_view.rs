//! Bounded, read-only views over a byte range of a file.
//!
//! A view prefers a private memory mapping of the page-aligned region that
//! covers the requested range and falls back to an owned buffer whenever
//! mapping is refused. Callers only ever see the requested bytes; the
//! alignment padding is skipped internally.
//!
//! Mapped views assume the file is not truncated while the view is alive.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Deref;
use std::path::Path;
use std::sync::OnceLock;
use memmap2::{Mmap, MmapOptions};
use crate::error::Result;

enum Backing {
    Mapped { map: Mmap, padding: usize },
    Buffered(Vec<u8>),
}

pub struct BoundedFileView {
    backing: Backing,
    len: usize,
}

impl BoundedFileView {
    /// Open `[offset, offset + length)` of `path`. A `length` of 0 means "to
    /// the end of the file"; any overrun is clamped to what the file holds.
    pub fn open(path: &Path, offset: u64, length: u64) -> Result<Self> {
        let file = File::open(path)?;
        let len = clamped_length(file.metadata()?.len(), offset, length)?;
        if len == 0 {
            return Ok(Self::empty());
        }

        match Self::map_region(&file, offset, len) {
            Ok(view) => Ok(view),
            Err(e) => {
                tracing::debug!("[FileView] Mapping {} failed ({}), reading into memory", path.display(), e);
                Self::read_region(file, offset, len)
            }
        }
    }

    /// Same contract as `open`, without attempting a mapping.
    pub fn open_buffered(path: &Path, offset: u64, length: u64) -> Result<Self> {
        let file = File::open(path)?;
        let len = clamped_length(file.metadata()?.len(), offset, length)?;
        if len == 0 {
            return Ok(Self::empty());
        }
        Self::read_region(file, offset, len)
    }

    fn empty() -> Self {
        Self { backing: Backing::Buffered(Vec::new()), len: 0 }
    }

    fn map_region(file: &File, offset: u64, len: usize) -> std::io::Result<Self> {
        let granularity = page_granularity();
        let aligned = offset - offset % granularity;
        let padding = (offset - aligned) as usize;

        // SAFETY: the mapping is read-only and private; the file is opened
        // read-only and is expected not to shrink while the view is alive.
        let map = unsafe {
            MmapOptions::new()
                .offset(aligned)
                .len(padding + len)
                .map(file)?
        };

        Ok(Self { backing: Backing::Mapped { map, padding }, len })
    }

    fn read_region(mut file: File, offset: u64, len: usize) -> Result<Self> {
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buffer)?;
        let len = buffer.len();
        Ok(Self { backing: Backing::Buffered(buffer), len })
    }

    /// Bytes actually readable through this view, which may be fewer than
    /// were requested.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped { .. })
    }

    /// Distance between the mapped region start and the requested offset.
    pub fn padding(&self) -> usize {
        match &self.backing {
            Backing::Mapped { padding, .. } => *padding,
            Backing::Buffered(_) => 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped { map, padding } => &map[*padding..*padding + self.len],
            Backing::Buffered(buffer) => &buffer[..self.len],
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Deref for BoundedFileView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for BoundedFileView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedFileView")
            .field("len", &self.len)
            .field("mapped", &self.is_mapped())
            .field("padding", &self.padding())
            .finish()
    }
}

fn clamped_length(file_size: u64, offset: u64, length: u64) -> Result<usize> {
    let remaining = file_size.saturating_sub(offset);
    let wanted = if length == 0 { remaining } else { length.min(remaining) };
    usize::try_from(wanted).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "range does not fit in memory").into()
    })
}

/// Alignment required for mapping offsets.
pub fn page_granularity() -> u64 {
    static GRANULARITY: OnceLock<u64> = OnceLock::new();
    *GRANULARITY.get_or_init(query_granularity)
}

#[cfg(unix)]
fn query_granularity() -> u64 {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 { page as u64 } else { 4096 }
}

#[cfg(not(unix))]
fn query_granularity() -> u64 {
    // Windows maps at allocation granularity, not page size
    65536
}
