//! A growing memory-mapped temporary file.
//!
//! Backs the string pool and its search tree. The file grows by
//! truncating to a larger capacity and remapping; readers only ever see
//! offsets below the logical length, which is tracked separately from
//! the mapped capacity.

use std::fs::File;
use std::io::Write as _;

use memmap2::MmapMut;

use crate::error::CoreResult;

const INITIAL_CAPACITY: u64 = 4096;

pub struct MemFile {
    file: File,
    map: MmapMut,
    len: u64,
    capacity: u64,
}

impl MemFile {
    /// Wrap a (fresh) file. The file is truncated to the initial capacity.
    pub fn new(file: File) -> CoreResult<Self> {
        file.set_len(INITIAL_CAPACITY)?;
        // Safety: the file is a freshly created, unlinked temp file owned
        // exclusively by this MemFile; nothing else maps or resizes it.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            file,
            map,
            len: 0,
            capacity: INITIAL_CAPACITY,
        })
    }

    /// Create a `MemFile` over an anonymous temp file in `dir`.
    pub fn create_in(dir: &std::path::Path) -> CoreResult<Self> {
        Self::new(tempfile::tempfile_in(dir)?)
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn grow_to(&mut self, needed: u64) -> CoreResult<()> {
        if needed <= self.capacity {
            return Ok(());
        }
        let mut capacity = self.capacity;
        while capacity < needed {
            capacity *= 2;
        }
        self.map.flush()?;
        self.file.set_len(capacity)?;
        // Safety: same exclusive ownership as in `new`; the old map is
        // replaced before anyone can observe the resized file.
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        self.capacity = capacity;
        Ok(())
    }

    /// Append bytes, returning the offset they landed at.
    pub fn append(&mut self, data: &[u8]) -> CoreResult<u64> {
        let off = self.len;
        self.grow_to(off + data.len() as u64)?;
        let start = off as usize;
        self.map[start..start + data.len()].copy_from_slice(data);
        self.len += data.len() as u64;
        Ok(off)
    }

    /// Read `len` bytes at `off`. Panics if the range is out of bounds,
    /// which would mean a corrupt offset from our own bookkeeping.
    #[must_use]
    pub fn read(&self, off: u64, len: usize) -> &[u8] {
        let start = off as usize;
        &self.map[start..start + len]
    }

    /// The NUL-terminated string starting at `off`.
    #[must_use]
    pub fn read_cstr(&self, off: u64) -> &[u8] {
        let start = off as usize;
        let end = self.map[start..self.len as usize]
            .iter()
            .position(|&b| b == 0)
            .map_or(self.len as usize, |p| start + p);
        &self.map[start..end]
    }

    pub fn read_u64(&self, off: u64) -> u64 {
        let mut buf = [0_u8; 8];
        buf.copy_from_slice(self.read(off, 8));
        u64::from_le_bytes(buf)
    }

    pub fn write_u64(&mut self, off: u64, v: u64) {
        let start = off as usize;
        self.map[start..start + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Flush and hand back the backing file trimmed to the logical length.
    pub fn into_file(mut self) -> CoreResult<File> {
        self.map.flush()?;
        self.file.set_len(self.len)?;
        self.file.flush()?;
        Ok(self.file)
    }
}
