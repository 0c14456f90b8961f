//! In-memory backend
//!
//! Bytes live in fixed-size pages that are allocated on first write and
//! kept in a sparse map keyed by page index, so a write far past the end
//! costs one page. Pages that were never written, or were fully erased,
//! read as zeros. Every handler completes before returning.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Range;
use std::rc::Rc;

use tracing::trace;

use super::{Backend, Capabilities, Stats};
use crate::error::{errno, Error, Result};
use crate::request::Request;

pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// Details attached to [`Stats::extended`] by [`MemoryBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub page_size: usize,
    pub pages_allocated: usize,
}

#[derive(Debug, Default)]
struct Pages {
    pages: BTreeMap<u64, Box<[u8]>>,
    length: u64,
}

/// Paged in-memory storage, useful for testing and scratch data.
#[derive(Debug)]
pub struct MemoryBackend {
    page_size: usize,
    inner: RefCell<Pages>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// # Panics
    ///
    /// If `page_size` is zero.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be positive");
        Self {
            page_size,
            inner: RefCell::new(Pages::default()),
        }
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Logical length: one past the last byte ever written.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.borrow().length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split `range` into (page index, range inside the page, range inside the buffer).
    fn chunks(&self, range: Range<u64>) -> impl Iterator<Item = (u64, Range<usize>, Range<usize>)> {
        let page_size = self.page_size as u64;
        let start = range.start;
        let mut at = range.start;
        std::iter::from_fn(move || {
            if at >= range.end {
                return None;
            }
            let page = at / page_size;
            let in_page = (at % page_size) as usize;
            let len = ((page_size - in_page as u64).min(range.end - at)) as usize;
            let in_buf = (at - start) as usize;
            at += len as u64;
            Some((page, in_page..in_page + len, in_buf..in_buf + len))
        })
    }

    fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.borrow();
        let end = offset.saturating_add(buf.len() as u64);
        if end > inner.length {
            return Err(Error::Backend(errno::ERANGE));
        }
        for (page, in_page, in_buf) in self.chunks(offset..end) {
            match inner.pages.get(&page) {
                Some(bytes) => buf[in_buf].copy_from_slice(&bytes[in_page]),
                None => buf[in_buf].fill(0),
            }
        }
        Ok(buf.len())
    }

    fn write_range(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(Error::Backend(errno::EINVAL))?;
        let mut inner = self.inner.borrow_mut();
        for (page, in_page, in_buf) in self.chunks(offset..end) {
            let bytes = inner
                .pages
                .entry(page)
                .or_insert_with(|| vec![0; self.page_size].into_boxed_slice());
            bytes[in_page].copy_from_slice(&data[in_buf]);
        }
        inner.length = inner.length.max(end);
        Ok(data.len())
    }

    fn erase_range(&self, offset: u64, size: usize) -> usize {
        let mut inner = self.inner.borrow_mut();
        let end = offset.saturating_add(size as u64).min(inner.length);
        if offset >= end {
            return 0;
        }
        for (page, in_page, _) in self.chunks(offset..end) {
            if in_page.len() == self.page_size {
                inner.pages.remove(&page);
            } else if let Some(bytes) = inner.pages.get_mut(&page) {
                bytes[in_page].fill(0);
            }
        }
        (end - offset) as usize
    }

    fn stats(&self) -> Stats {
        let inner = self.inner.borrow();
        let pages_allocated = inner.pages.len();
        Stats {
            size: inner.length,
            extended: Some(Rc::new(MemoryStats {
                page_size: self.page_size,
                pages_allocated,
            })),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities::read_write()
    }

    fn read(&self, mut request: Request) {
        let offset = request.offset();
        let result = self.read_range(offset, request.data_mut());
        trace!(offset, ?result, "memory read");
        request.complete(result);
    }

    fn write(&self, request: Request) {
        let result = self.write_range(request.offset(), request.data());
        request.complete(result);
    }

    fn delete(&self, request: Request) {
        let erased = self.erase_range(request.offset(), request.size());
        request.complete(Ok(erased));
    }

    fn stat(&self, mut request: Request) {
        let stats = self.stats();
        if let Some(slot) = request.stats_mut() {
            *slot = stats;
        }
        let size = request.size();
        request.complete(Ok(size));
    }

    fn destroy(&self, request: Request) {
        *self.inner.borrow_mut() = Pages::default();
        request.complete(Ok(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cross_page_boundaries() {
        let backend = MemoryBackend::with_page_size(4);
        let chunks: Vec<_> = backend.chunks(2..11).collect();
        assert_eq!(
            chunks,
            vec![(0, 2..4, 0..2), (1, 0..4, 2..6), (2, 0..3, 6..9)]
        );
    }

    #[test]
    fn unwritten_pages_read_as_zero() {
        let backend = MemoryBackend::with_page_size(4);
        backend.write_range(9, &[7]).unwrap();

        let mut buf = [0xff; 10];
        assert_eq!(backend.read_range(0, &mut buf).unwrap(), 10);
        assert_eq!(buf, [0, 0, 0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(backend.inner.borrow().pages.len(), 1);
    }

    #[test]
    fn read_past_end_fails() {
        let backend = MemoryBackend::new();
        backend.write_range(0, &[1, 2, 3]).unwrap();
        let mut buf = [0; 4];
        assert_eq!(
            backend.read_range(0, &mut buf).unwrap_err(),
            Error::Backend(errno::ERANGE)
        );
    }

    #[test]
    fn erase_drops_whole_pages() {
        let backend = MemoryBackend::with_page_size(4);
        backend.write_range(0, &[1; 12]).unwrap();
        assert_eq!(backend.erase_range(2, 8), 8);

        let inner = backend.inner.borrow();
        assert!(inner.pages.contains_key(&0));
        assert!(!inner.pages.contains_key(&1));
        assert_eq!(inner.pages.get(&2).map(|p| &p[..]), Some(&[0, 0, 1, 1][..]));
        assert_eq!(inner.length, 12);
    }

    #[test]
    fn far_offsets_allocate_one_page() {
        let backend = MemoryBackend::new();
        let offset = 1u64 << 60;
        assert_eq!(backend.write_range(offset, &[1, 2, 3, 4]).unwrap(), 4);
        assert_eq!(backend.len(), offset + 4);
        assert_eq!(backend.inner.borrow().pages.len(), 1);

        let mut buf = [0; 4];
        backend.read_range(offset, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn write_past_u64_is_invalid() {
        let backend = MemoryBackend::new();
        assert_eq!(
            backend.write_range(u64::MAX - 1, &[1, 2, 3]).unwrap_err(),
            Error::Backend(errno::EINVAL)
        );
        assert!(backend.is_empty());
    }

    #[test]
    fn erase_is_clamped_to_length() {
        let backend = MemoryBackend::with_page_size(4);
        backend.write_range(0, &[1; 6]).unwrap();
        assert_eq!(backend.erase_range(4, 100), 2);
        assert_eq!(backend.erase_range(50, 1), 0);
    }
}
