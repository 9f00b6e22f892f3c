//! Sorted run storage.
//!
//! All runs are appended to a single spill file and addressed by offset and length.
//! Every run is read back through its own [`ChunkView`] backed by a separate file handle,
//! so views can be consumed concurrently without sharing a cursor.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use crate::{Entry, SortError};

/// Destination of sorted runs.
pub trait RunSink<T> {
    /// Persists one sorted run.
    fn store_run(&mut self, run: &[T]) -> Result<(), SortError>;
}

/// In-memory sink keeping every run as a separate vector.
impl<T: Clone> RunSink<T> for Vec<Vec<T>> {
    fn store_run(&mut self, run: &[T]) -> Result<(), SortError> {
        self.push(run.to_vec());
        Ok(())
    }
}

/// Byte range of one sorted run inside the spill file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub offset: u64,
    pub length: u64,
}

/// Spill file owner.
pub struct ChunkRepository {
    path: Option<PathBuf>,
    writer: Option<io::BufWriter<fs::File>>,
    position: u64,
    chunks: Vec<ChunkDescriptor>,
    rw_buf_size: usize,
}

impl ChunkRepository {
    /// Creates a repository with no spill file attached.
    pub fn new(rw_buf_size: usize) -> Self {
        ChunkRepository {
            path: None,
            writer: None,
            position: 0,
            chunks: Vec::new(),
            rw_buf_size,
        }
    }

    /// Creates (or truncates) the spill file at `path` and opens it for writing.
    /// Must be called before any other operation.
    pub fn select_temp_file(&mut self, path: &Path) -> Result<(), SortError> {
        self.close()?;

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(SortError::TempFile)?;

        log::info!("using {} as a spill file", path.display());

        self.writer = Some(io::BufWriter::with_capacity(self.rw_buf_size, file));
        self.path = Some(path.to_path_buf());
        self.position = 0;

        return Ok(());
    }

    /// Appends serialized `entries` at the end of the spill file and records their range.
    pub fn store_chunk(&mut self, entries: &[Entry]) -> Result<ChunkDescriptor, SortError> {
        let writer = self.writer.as_mut().ok_or(SortError::State("spill file is not selected"))?;

        let offset = self.position;
        let mut length = 0;
        for entry in entries {
            length += entry.write_to(writer)? as u64;
        }
        writer.flush()?;

        let chunk = ChunkDescriptor { offset, length };
        self.position += length;
        self.chunks.push(chunk);
        log::debug!("chunk {} stored at {} ({} bytes)", self.chunks.len(), offset, length);

        return Ok(chunk);
    }

    /// Opens an independent read view for every stored chunk.
    pub fn chunks(&self) -> Result<Vec<ChunkView<fs::File>>, SortError> {
        let path = self.path.as_deref().ok_or(SortError::State("spill file is not selected"))?;

        self.chunks
            .iter()
            .map(|chunk| -> Result<ChunkView<fs::File>, SortError> {
                let file = fs::File::open(path)?;
                Ok(ChunkView::new(file, chunk.offset, chunk.length)?)
            })
            .collect()
    }

    pub fn descriptors(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the write handle, deletes the spill file and forgets all chunks.
    /// Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), SortError> {
        let flushed = match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        };

        self.chunks.clear();
        self.position = 0;

        if let Some(path) = self.path.take() {
            match fs::remove_file(&path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(SortError::Io(err)),
                _ => log::debug!("spill file {} removed", path.display()),
            }
        }

        return Ok(flushed?);
    }
}

impl RunSink<Entry> for ChunkRepository {
    fn store_run(&mut self, run: &[Entry]) -> Result<(), SortError> {
        self.store_chunk(run).map(|_| ())
    }
}

impl Drop for ChunkRepository {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("spill file teardown failed: {}", err);
        }
    }
}

/// Read-only window over `[offset, offset + length)` of a backing stream.
///
/// The backing stream is moved forward by `offset` from its current position on creation.
/// Reads are clamped to the window; every mutation is rejected.
pub struct ChunkView<R> {
    inner: R,
    length: u64,
    position: u64,
}

impl<R: Read + Seek> ChunkView<R> {
    pub fn new(mut inner: R, offset: u64, length: u64) -> io::Result<Self> {
        let offset = i64::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk offset out of range"))?;
        inner.seek(SeekFrom::Current(offset))?;

        Ok(ChunkView {
            inner,
            length,
            position: 0,
        })
    }
}

impl<R> ChunkView<R> {
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of bytes already delivered.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn set_len(&mut self, _length: u64) -> Result<(), SortError> {
        Err(SortError::UnsupportedOperation("chunk view length cannot be changed"))
    }

    pub fn set_position(&mut self, _position: u64) -> Result<(), SortError> {
        Err(SortError::UnsupportedOperation("chunk view is not seekable"))
    }
}

fn unsupported(operation: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, SortError::UnsupportedOperation(operation))
}

impl<R: Read> Read for ChunkView<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length - self.position;
        if remaining == 0 {
            return Ok(0);
        }

        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let read = self.inner.read(&mut buf[..max])?;
        self.position += read as u64;

        return Ok(read);
    }
}

impl<R> Write for ChunkView<R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("chunk view is read-only"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Only `SeekFrom::Current(0)` is accepted, as a position query.
impl<R> Seek for ChunkView<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(unsupported("chunk view is not seekable")),
        }
    }
}
