use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Positional read that does not move any shared file cursor
#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "failed to fill whole buffer")),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write whole buffer")),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Append-only file of row bodies (`data.bin`)
///
/// Opened either for appending (WRITE) or for positional reads (READ),
/// never both.
pub struct DataFile {
    file: File,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    /// Offset the next appended row body lands at
    len: u64,
}

impl DataFile {
    /// Create or truncate a data file for appending
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let writer = BufWriter::with_capacity(256 * 1024, file.try_clone()?);
        debug!(path = %path.display(), "created data file");
        Ok(DataFile { file, path, writer: Some(writer), len: 0 })
    }

    /// Open an existing data file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(DataFile { file, path, writer: None, len })
    }

    /// Append a row body, returning the offset it was written at
    pub fn append(&mut self, body: &[u8]) -> io::Result<u64> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::PermissionDenied, "data file is open read-only")
        })?;
        writer.write_all(body)?;
        let offset = self.len;
        self.len += body.len() as u64;
        Ok(offset)
    }

    /// Read `buf.len()` bytes starting at `offset`
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if offset + buf.len() as u64 > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {} bytes at {} past end of {}", buf.len(), offset, self.path.display()),
            ));
        }
        read_exact_at(&self.file, buf, offset)
    }

    /// Flush buffered appends and sync to disk
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Fixed-size page storage backing a B-tree file
pub struct PageFile {
    file: File,
    path: PathBuf,
    page_size: usize,
    /// Next page number to allocate
    next_page: u32,
}

impl PageFile {
    /// Create or truncate a page file for writing; page 0 is reserved for the header
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(PageFile { file, path, page_size, next_page: 1 })
    }

    /// Open an existing page file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(PageFile { file, path, page_size: 0, next_page: 0 })
    }

    pub(crate) fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size;
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_offset(&self, page_no: u32) -> u64 {
        page_no as u64 * self.page_size as u64
    }

    /// Read raw bytes from the start of the file (header probing)
    pub fn read_prefix(&self, buf: &mut [u8]) -> io::Result<()> {
        read_exact_at(&self.file, buf, 0)
    }

    pub fn read_page(&self, page_no: u32, buf: &mut [u8]) -> io::Result<()> {
        if buf.len() != self.page_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("page buffer must be exactly {} bytes, got {}", self.page_size, buf.len()),
            ));
        }
        read_exact_at(&self.file, buf, self.page_offset(page_no))
    }

    pub fn write_page(&self, page_no: u32, data: &[u8]) -> io::Result<()> {
        if data.len() != self.page_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("page data must be exactly {} bytes, got {}", self.page_size, data.len()),
            ));
        }
        write_all_at(&self.file, data, self.page_offset(page_no))
    }

    /// Allocate a new page number
    pub fn allocate_page(&mut self) -> u32 {
        let page_no = self.next_page;
        self.next_page += 1;
        page_no
    }

    /// Number of pages allocated so far, header included
    pub fn num_pages(&self) -> u32 {
        self.next_page
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Drop all contents, leaving an empty file
    pub fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.next_page = 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_data_file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut data = DataFile::create(&path).unwrap();
        assert_eq!(data.append(b"hello").unwrap(), 0);
        assert_eq!(data.append(b"world!").unwrap(), 5);
        data.flush().unwrap();
        drop(data);

        let data = DataFile::open(&path).unwrap();
        assert_eq!(data.len(), 11);
        let mut buf = [0u8; 6];
        data.read_at(5, &mut buf).unwrap();
        assert_eq!(&buf, b"world!");
        assert!(data.read_at(8, &mut buf).is_err());
    }

    #[test]
    fn test_read_only_data_file_rejects_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        DataFile::create(&path).unwrap().flush().unwrap();
        let mut data = DataFile::open(&path).unwrap();
        assert!(data.append(b"x").is_err());
    }

    #[test]
    fn test_page_file_allocate_and_round_trip() {
        let dir = tempdir().unwrap();
        let mut pages = PageFile::create(dir.path().join("t.db"), 1024).unwrap();
        let first = pages.allocate_page();
        assert_eq!(first, 1);
        let data = vec![7u8; 1024];
        pages.write_page(first, &data).unwrap();
        let mut buf = vec![0u8; 1024];
        pages.read_page(first, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert!(pages.write_page(2, &[0u8; 10]).is_err());
        assert_eq!(pages.num_pages(), 2);
    }
}
