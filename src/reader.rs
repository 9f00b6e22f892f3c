//! Streaming entry reader.

use std::io;
use std::io::prelude::*;

use crate::{Cancellation, Entry, SortError};

/// Lazy, single-pass tokenizer turning a byte stream into entries.
///
/// Keeps one reusable buffer; bytes of an unterminated line are carried over to the
/// front of the buffer before the next read. No single line may be longer than the
/// buffer capacity. Empty lines produce no entry and a final line without `'\n'`
/// still produces one.
pub struct EntryReader<R> {
    reader: R,
    buffer: Box<[u8]>,
    /// Scan position inside the filled region.
    start: usize,
    /// End of the filled region.
    end: usize,
    eof: bool,
    finished: bool,
    cancellation: Cancellation,
}

impl<R: Read> EntryReader<R> {
    /// Creates a reader with a buffer of at least `capacity` bytes.
    /// The capacity is rounded up to the next power of two and the whole buffer is used.
    pub fn new(reader: R, capacity: usize) -> Self {
        Self::with_cancellation(reader, capacity, Cancellation::new())
    }

    pub fn with_cancellation(reader: R, capacity: usize, cancellation: Cancellation) -> Self {
        let capacity = capacity.max(1).next_power_of_two();

        EntryReader {
            reader,
            buffer: vec![0; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
            eof: false,
            finished: false,
            cancellation,
        }
    }

    /// Returns the actual buffer capacity.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn next_entry(&mut self) -> Result<Option<Entry>, SortError> {
        loop {
            self.cancellation.check()?;

            let window = &self.buffer[self.start..self.end];
            match memchr::memchr(b'\n', window) {
                Some(0) => {
                    self.start += 1;
                    continue;
                }
                Some(length) => {
                    let line = &window[..length];
                    self.start += length + 1;
                    return Entry::from_bytes(line).map(Some);
                }
                None if self.eof => {
                    if window.is_empty() {
                        return Ok(None);
                    }
                    let entry = Entry::from_bytes(window)?;
                    self.start = self.end;
                    return Ok(Some(entry));
                }
                None => self.fill()?,
            }
        }
    }

    /// Moves the unconsumed tail to the buffer start and reads more data after it.
    fn fill(&mut self) -> Result<(), SortError> {
        let leftover = self.end - self.start;
        self.buffer.copy_within(self.start..self.end, 0);
        self.start = 0;
        self.end = leftover;

        if leftover == self.buffer.len() {
            return Err(SortError::Capacity(format!(
                "single line exceeds chunk size of {} bytes",
                self.buffer.len()
            )));
        }

        loop {
            match self.reader.read(&mut self.buffer[self.end..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(read) => {
                    self.end += read;
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(SortError::Io(err)),
            }
        }
    }
}

impl<R: Read> Iterator for EntryReader<R> {
    type Item = Result<Entry, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::EntryReader;
    use crate::{Cancellation, SortError};

    fn read_lines(data: &[u8], capacity: usize) -> Result<Vec<String>, SortError> {
        EntryReader::new(io::Cursor::new(data.to_vec()), capacity)
            .map(|entry| entry.map(|entry| String::from_utf8(entry.to_bytes()).unwrap()))
            .collect()
    }

    #[rstest]
    #[case(b"1. Hello World\n", 16, vec!["1. Hello World\n"])]
    #[case(
        b"1. 456789012345\n1. 456789012345\n3. Line3\n",
        32,
        vec!["1. 456789012345\n", "1. 456789012345\n", "3. Line3\n"],
    )]
    #[case(b"1. Line1\n2. Line2\n3. Line3", 16, vec!["1. Line1\n", "2. Line2\n", "3. Line3\n"])]
    #[case(b"1234567. A12\n2. ABCDEFG\n", 16, vec!["1234567. A12\n", "2. ABCDEFG\n"])]
    #[case(b"1. Line1\n\n3. Line3\n", 16, vec!["1. Line1\n", "3. Line3\n"])]
    #[case(b"1. Line1\r\n3. Line3\r\n", 16, vec!["1. Line1\r\n", "3. Line3\r\n"])]
    #[case(b"\n\n\n", 16, vec![])]
    #[case(b"", 16, vec![])]
    fn test_read_entries(#[case] data: &[u8], #[case] capacity: usize, #[case] expected: Vec<&str>) {
        assert_eq!(read_lines(data, capacity).unwrap(), expected);
    }

    #[test]
    fn test_entry_fields() {
        let entries: Vec<_> = EntryReader::new(&b"1. Hello World\n"[..], 16)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].number(), 1);
        assert_eq!(entries[0].phrase(), b"Hello World");
    }

    #[test]
    fn test_capacity_rounding() {
        let reader = EntryReader::new(io::empty(), 20);
        assert_eq!(reader.capacity(), 32);

        assert_eq!(read_lines(b"1. 123456789012345\n", 20).unwrap().len(), 1);
    }

    #[test]
    fn test_line_exceeds_capacity() {
        let result = read_lines(b"1. 1234567890123456\n\n3. Line3\n", 16);
        assert!(matches!(result, Err(SortError::Capacity(_))));
    }

    #[test]
    fn test_format_error_stops_reading() {
        let mut reader = EntryReader::new(&b"broken\n1. fine\n"[..], 16);

        assert!(matches!(reader.next(), Some(Err(SortError::Format(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_cancellation() {
        let cancellation = Cancellation::new();
        let mut reader = EntryReader::with_cancellation(&b"1. Line1\n2. Line2\n"[..], 16, cancellation.clone());

        assert!(reader.next().unwrap().is_ok());
        cancellation.cancel();
        assert!(reader.next().unwrap().unwrap_err().is_cancelled());
        assert!(reader.next().is_none());
    }
}
