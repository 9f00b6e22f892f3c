//! Fixed-capacity record and its total order.

use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::io::prelude::*;

use crate::SortError;

/// Maximum phrase length in bytes.
pub const MAX_PHRASE_LEN: usize = 256;

/// Longest possible serialized entry: `u32::MAX` digits, `". "`, phrase and `'\n'`.
pub const MAX_ENCODED_LEN: usize = 10 + 2 + MAX_PHRASE_LEN + 1;

/// One parsed `<number>. <phrase>` record.
///
/// The phrase is stored inline so an entry never owns heap memory and can be moved
/// around heap slots and sort buffers by plain copies. Bytes past `phrase_len` are
/// always zero.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    number: u32,
    phrase: [u8; MAX_PHRASE_LEN],
    phrase_len: u16,
}

impl Entry {
    /// Creates an entry from its parts.
    ///
    /// Fails with [`SortError::Format`] if the phrase is longer than [`MAX_PHRASE_LEN`].
    pub fn new(number: u32, phrase: &[u8]) -> Result<Self, SortError> {
        if phrase.len() > MAX_PHRASE_LEN {
            return Err(SortError::Format(format!(
                "phrase of {} bytes exceeds {} bytes",
                phrase.len(),
                MAX_PHRASE_LEN
            )));
        }

        let mut entry = Entry {
            number,
            phrase: [0; MAX_PHRASE_LEN],
            phrase_len: phrase.len() as u16,
        };
        entry.phrase[..phrase.len()].copy_from_slice(phrase);

        return Ok(entry);
    }

    /// Parses a single line without its terminating `'\n'`.
    ///
    /// Digits preceding the first `'.'` are accumulated into the number without overflow or
    /// digit validation, then exactly two bytes (`". "`) are skipped and the rest of the line
    /// becomes the phrase verbatim, including a trailing `'\r'` if present.
    pub fn from_bytes(line: &[u8]) -> Result<Self, SortError> {
        let mut number: u32 = 0;
        let mut pos = 0;
        while pos < line.len() && line[pos] != b'.' {
            number = number
                .wrapping_mul(10)
                .wrapping_add(line[pos].wrapping_sub(b'0') as u32);
            pos += 1;
        }

        let phrase_start = pos + 2;
        if phrase_start > line.len() {
            return Err(SortError::Format(format!(
                "number delimiter not found in line {:?}",
                String::from_utf8_lossy(line)
            )));
        }

        Entry::new(number, &line[phrase_start..])
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn phrase(&self) -> &[u8] {
        &self.phrase[..self.phrase_len as usize]
    }

    pub fn phrase_len(&self) -> usize {
        self.phrase_len as usize
    }

    /// Serializes the entry into `buf` in wire format, `'\n'` included.
    /// Returns the number of bytes written.
    pub fn encode(&self, buf: &mut [u8; MAX_ENCODED_LEN]) -> usize {
        let mut digits = [0u8; 10];
        let mut start = digits.len();
        let mut value = self.number;
        loop {
            start -= 1;
            digits[start] = b'0' + (value % 10) as u8;
            value /= 10;
            if value == 0 {
                break;
            }
        }

        let digits = &digits[start..];
        let mut len = digits.len();
        buf[..len].copy_from_slice(digits);

        buf[len..len + 2].copy_from_slice(b". ");
        len += 2;

        let phrase = self.phrase();
        buf[len..len + phrase.len()].copy_from_slice(phrase);
        len += phrase.len();

        buf[len] = b'\n';
        return len + 1;
    }

    /// Writes the serialized entry to `writer`. Returns the number of bytes written.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let len = self.encode(&mut buf);
        writer.write_all(&buf[..len])?;

        return Ok(len);
    }

    /// Returns the serialized entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let len = self.encode(&mut buf);
        buf[..len].to_vec()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.number, String::from_utf8_lossy(self.phrase()))
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("number", &self.number)
            .field("phrase", &String::from_utf8_lossy(self.phrase()))
            .finish()
    }
}

/// Compares phrases byte by byte with ASCII case folding; on a common prefix the shorter
/// phrase sorts first.
#[inline]
pub fn compare_phrases(a: &[u8], b: &[u8]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase()) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    a.len().cmp(&b.len())
}

/// Entry order: case-folded phrase first, then number ascending.
#[inline]
pub fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    compare_phrases(a.phrase(), b.phrase()).then(a.number.cmp(&b.number))
}
