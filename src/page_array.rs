//! `PageArray`: the consumed interface to the low-level paged-file backing
//! store (spec §6). Deliberately out of the core's scope per spec §1 — this
//! module only defines the trait boundary plus two concrete doubles an
//! embedder (or this crate's own tests) can use: an in-memory array for
//! tests, and a real file-backed array for anything else.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{EngineError, Result};

/// Errors from this trait are surfaced to the caller verbatim; the engine
/// does not retry (spec §6).
pub trait PageArray: Send + Sync {
    fn page_size(&self) -> u32;
    fn page_count(&self) -> u64;
    fn set_page_count(&self, count: u64) -> Result<()>;
    fn read_page(&self, index: u64, out: &mut [u8], offset: usize, length: usize) -> Result<()>;
    fn write_page(&self, index: u64, buf: &[u8], offset: usize) -> Result<()>;
    fn sync(&self, metadata: bool) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// An in-memory `PageArray`, used throughout this crate's own test suite
/// (matching the pack's common pattern of an in-memory double standing in
/// for a real paged file).
pub struct MemPageArray {
    page_size: u32,
    pages: Mutex<Vec<Vec<u8>>>,
}

impl MemPageArray {
    pub fn new(page_size: u32) -> Self {
        MemPageArray {
            page_size,
            pages: Mutex::new(Vec::new()),
        }
    }
}

impl PageArray for MemPageArray {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.pages.lock().len() as u64
    }

    fn set_page_count(&self, count: u64) -> Result<()> {
        let mut pages = self.pages.lock();
        let count = count as usize;
        if count > pages.len() {
            pages.resize_with(count, || vec![0u8; self.page_size as usize]);
        } else {
            pages.truncate(count);
        }
        Ok(())
    }

    fn read_page(&self, index: u64, out: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let pages = self.pages.lock();
        let page = pages.get(index as usize).ok_or_else(|| {
            EngineError::corrupt(
                Some(crate::types::PageId(index)),
                "read past end of page array",
            )
        })?;
        out[..length].copy_from_slice(&page[offset..offset + length]);
        Ok(())
    }

    fn write_page(&self, index: u64, buf: &[u8], offset: usize) -> Result<()> {
        let mut pages = self.pages.lock();
        if index as usize >= pages.len() {
            pages.resize_with(index as usize + 1, || vec![0u8; self.page_size as usize]);
        }
        let page = &mut pages[index as usize];
        page[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self, _metadata: bool) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.pages.lock().clear();
        Ok(())
    }
}

/// A real file-backed `PageArray`. Pages are addressed by `index * page_size`
/// byte offsets, seeking then reading/writing each page directly rather than
/// memory-mapping the file.
pub struct FilePageArray {
    page_size: u32,
    file: Mutex<File>,
}

impl FilePageArray {
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(FilePageArray {
            page_size,
            file: Mutex::new(file),
        })
    }
}

impl PageArray for FilePageArray {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        let file = self.file.lock();
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        len / self.page_size as u64
    }

    fn set_page_count(&self, count: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(count * self.page_size as u64)?;
        Ok(())
    }

    fn read_page(&self, index: u64, out: &mut [u8], offset: usize, length: usize) -> Result<()> {
        let mut file = self.file.lock();
        let pos = index * self.page_size as u64 + offset as u64;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut out[..length])?;
        Ok(())
    }

    fn write_page(&self, index: u64, buf: &[u8], offset: usize) -> Result<()> {
        let mut file = self.file.lock();
        let pos = index * self.page_size as u64 + offset as u64;
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sync(&self, metadata: bool) -> Result<()> {
        let file = self.file.lock();
        if metadata {
            file.sync_all()?;
        } else {
            file.sync_data()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.file.lock().sync_all().ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_array_round_trips_pages() {
        let arr = MemPageArray::new(256);
        arr.set_page_count(4).unwrap();
        let page = vec![7u8; 256];
        arr.write_page(2, &page, 0).unwrap();
        let mut out = vec![0u8; 256];
        arr.read_page(2, &mut out, 0, 256).unwrap();
        assert_eq!(out, page);
    }
}
