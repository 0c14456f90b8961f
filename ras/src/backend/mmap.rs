//! Memory-mapped file backend
//!
//! The whole file is mapped on open. A write past the end grows the file and
//! remaps it; every write and erase is flushed before the request completes.
//! Handlers complete before returning.

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::{debug, trace};

use super::{Backend, Capabilities, Stats};
use crate::error::{errno, Error, Result};
use crate::request::Request;

enum Region {
    Empty,
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Region {
    fn bytes(&self) -> &[u8] {
        match self {
            Region::Empty => &[],
            Region::ReadOnly(map) => &map[..],
            Region::ReadWrite(map) => &map[..],
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            Region::ReadWrite(map) => map.flush(),
            _ => Ok(()),
        }
    }
}

struct Mapped {
    file: File,
    region: Region,
}

pub struct MmapBackend {
    path: PathBuf,
    read_only: bool,
    remove_on_destroy: bool,
    mapped: RefCell<Option<Mapped>>,
}

impl MmapBackend {
    /// Read-write storage over `path`; the file is created on open.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            read_only: false,
            remove_on_destroy: false,
            mapped: RefCell::new(None),
        }
    }

    /// Read-only storage over an existing file.
    pub fn read_only(path: impl AsRef<Path>) -> Self {
        Self {
            read_only: true,
            ..Self::new(path)
        }
    }

    /// Delete the file when the storage is destroyed.
    #[must_use]
    pub fn remove_on_destroy(mut self, remove: bool) -> Self {
        self.remove_on_destroy = remove;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map(file: &File, read_only: bool) -> io::Result<Region> {
        if file.metadata()?.len() == 0 {
            return Ok(Region::Empty);
        }
        // SAFETY: the mapping is private to this backend; nothing here
        // truncates the file while it is mapped.
        let region = unsafe {
            if read_only {
                Region::ReadOnly(MmapOptions::new().map(file)?)
            } else {
                Region::ReadWrite(MmapOptions::new().map_mut(file)?)
            }
        };
        Ok(region)
    }

    fn open_file(&self, read_only: bool) -> Result<()> {
        let file = if read_only {
            File::open(&self.path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?
        };
        let region = Self::map(&file, read_only)?;
        debug!(path = %self.path.display(), read_only, len = region.bytes().len(), "mapped");
        *self.mapped.borrow_mut() = Some(Mapped { file, region });
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mapped = self.mapped.borrow();
        let bytes = mapped.as_ref().ok_or(Error::Backend(errno::EBADF))?.region.bytes();
        let range = byte_range(offset, buf.len())?;
        let src = bytes.get(range).ok_or(Error::Backend(errno::ERANGE))?;
        buf.copy_from_slice(src);
        Ok(buf.len())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let mut guard = self.mapped.borrow_mut();
        let mapped = guard.as_mut().ok_or(Error::Backend(errno::EBADF))?;
        if data.is_empty() {
            return Ok(0);
        }
        let range = byte_range(offset, data.len())?;
        if range.end > mapped.region.bytes().len() {
            mapped.region.flush()?;
            mapped.region = Region::Empty;
            mapped.file.set_len(range.end as u64)?;
            mapped.region = Self::map(&mapped.file, false)?;
            trace!(len = range.end, "grown");
        }
        let Region::ReadWrite(map) = &mut mapped.region else {
            return Err(Error::Backend(errno::EBADF));
        };
        let (start, len) = (range.start, range.len());
        map[range].copy_from_slice(data);
        map.flush_range(start, len)?;
        Ok(len)
    }

    fn erase(&self, offset: u64, size: usize) -> Result<usize> {
        let mut guard = self.mapped.borrow_mut();
        let mapped = guard.as_mut().ok_or(Error::Backend(errno::EBADF))?;
        let Region::ReadWrite(map) = &mut mapped.region else {
            return Ok(0);
        };
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let end = start.saturating_add(size).min(map.len());
        if start >= end {
            return Ok(0);
        }
        map[start..end].fill(0);
        map.flush_range(start, end - start)?;
        Ok(end - start)
    }

    fn length(&self) -> Result<u64> {
        let mapped = self.mapped.borrow();
        let mapped = mapped.as_ref().ok_or(Error::Backend(errno::EBADF))?;
        Ok(mapped.region.bytes().len() as u64)
    }

    fn unmap(&self) -> Result<()> {
        if let Some(mapped) = self.mapped.borrow_mut().take() {
            mapped.region.flush()?;
        }
        Ok(())
    }
}

fn byte_range(offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
    let start = usize::try_from(offset).map_err(|_| Error::Backend(errno::EINVAL))?;
    let end = start
        .checked_add(len)
        .ok_or(Error::Backend(errno::EINVAL))?;
    Ok(start..end)
}

impl Backend for MmapBackend {
    fn capabilities(&self) -> Capabilities {
        if self.read_only {
            Capabilities {
                open_read_only: true,
                read: true,
                stat: true,
                close: true,
                destroy: true,
                ..Capabilities::default()
            }
        } else {
            Capabilities::read_write()
        }
    }

    fn open_read_only(&self, request: Request) {
        let result = self.open_file(true).map(|()| 0);
        request.complete(result);
    }

    fn open(&self, request: Request) {
        let result = self.open_file(false).map(|()| 0);
        request.complete(result);
    }

    fn read(&self, mut request: Request) {
        let offset = request.offset();
        let result = self.read_at(offset, request.data_mut());
        request.complete(result);
    }

    fn write(&self, request: Request) {
        let result = self.write_at(request.offset(), request.data());
        request.complete(result);
    }

    fn delete(&self, request: Request) {
        let result = self.erase(request.offset(), request.size());
        request.complete(result);
    }

    fn stat(&self, mut request: Request) {
        match self.length() {
            Ok(size) => {
                if let Some(stats) = request.stats_mut() {
                    *stats = Stats {
                        size,
                        extended: None,
                    };
                }
                let size = request.size();
                request.complete(Ok(size));
            }
            Err(err) => request.complete(Err(err)),
        }
    }

    fn close(&self, request: Request) {
        let result = self.unmap().map(|()| 0);
        request.complete(result);
    }

    fn destroy(&self, request: Request) {
        let mut result = self.unmap().map(|()| 0);
        if result.is_ok() && self.remove_on_destroy {
            result = match fs::remove_file(&self.path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
                _ => Ok(0),
            };
        }
        request.complete(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_grows_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MmapBackend::new(dir.path().join("data"));
        backend.open_file(false).unwrap();
        assert_eq!(backend.length().unwrap(), 0);

        backend.write_at(10, &[1, 2, 3]).unwrap();
        assert_eq!(backend.length().unwrap(), 13);

        let mut buf = [0xff; 13];
        backend.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..10], &[0; 10]);
        assert_eq!(&buf[10..], &[1, 2, 3]);
    }

    #[test]
    fn read_past_end_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MmapBackend::new(dir.path().join("data"));
        backend.open_file(false).unwrap();
        backend.write_at(0, &[9; 4]).unwrap();

        let mut buf = [0; 8];
        assert_eq!(
            backend.read_at(2, &mut buf).unwrap_err(),
            Error::Backend(errno::ERANGE)
        );
    }

    #[test]
    fn closed_backend_reports_bad_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MmapBackend::new(dir.path().join("data"));
        assert_eq!(backend.length().unwrap_err(), Error::Backend(errno::EBADF));
    }
}
