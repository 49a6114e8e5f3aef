//! Bounded scratch buffer with reader/writer cursors (C1).
//!
//! A [`Record`] either owns its backing buffer or borrows a slice of
//! another record's. Integers are pushed and popped in an explicit
//! endianness; short reads never panic — they collapse the reader onto the
//! writer so a caller never observes a partially consumed object.
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum RecordError {
    /// Not enough free space to push the requested value.
    NoSpace,
    /// Not enough buffered bytes to pop the requested value.
    Underrun,
}

pub type Result<T> = std::result::Result<T, RecordError>;

#[derive(Clone, Copy, Eq, PartialEq)]
pub enum Endian {
    Big,
    Little,
}

/// Owning or borrowing view over a byte buffer with (capacity, filled
/// size, reader offset, writer offset).
#[derive(Clone)]
pub struct Record {
    buf: Vec<u8>,
    /// Logical capacity; for a borrowed sub-record this is the slice length.
    capacity: usize,
    reader: usize,
    writer: usize,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Record")
            .field("capacity", &self.capacity)
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .finish()
    }
}

impl Record {
    /// Empty, writable record with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            reader: 0,
            writer: 0,
        }
    }

    /// Read-only view over `data`: reader starts at 0, writer is pinned to
    /// the end so `Available()` covers the whole buffer.
    pub fn from_filled(data: &[u8]) -> Self {
        Self {
            buf: data.to_vec(),
            capacity: data.len(),
            reader: 0,
            writer: data.len(),
        }
    }

    /// Writable scratch pad of `capacity` bytes that is already `filled`
    /// bytes deep (write-then-read use, e.g. a continuation accumulator).
    pub fn from_scratch(capacity: usize, filled: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            reader: 0,
            writer: filled.min(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written so far.
    pub fn length(&self) -> usize {
        self.writer
    }

    /// Bytes free to write.
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.writer)
    }

    /// Bytes available to read.
    pub fn available(&self) -> usize {
        self.writer.saturating_sub(self.reader)
    }

    pub fn reader_offset(&self) -> usize {
        self.reader
    }

    pub fn writer_offset(&self) -> usize {
        self.writer
    }

    /// Resets the reader to the start; does not touch written data.
    pub fn rewind(&mut self) {
        self.reader = 0;
    }

    /// Resets both cursors; the buffer is logically empty again.
    pub fn clear(&mut self) {
        self.reader = 0;
        self.writer = 0;
    }

    pub fn as_written(&self) -> &[u8] {
        &self.buf[..self.writer]
    }

    pub fn as_unread(&self) -> &[u8] {
        &self.buf[self.reader..self.writer]
    }

    fn consume_all(&mut self) {
        self.reader = self.writer;
    }

    /// Pushes raw bytes; asserts free space but never grows the buffer.
    pub fn push_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.free() {
            return Err(RecordError::NoSpace);
        }
        let end = self.writer + data.len();
        self.buf[self.writer..end].copy_from_slice(data);
        self.writer = end;
        Ok(())
    }

    pub fn push_u8(&mut self, value: u8) -> Result<()> {
        self.push_bytes(&[value])
    }

    pub fn push_bool(&mut self, value: bool) -> Result<()> {
        self.push_u8(value as u8)
    }

    pub fn push_u16(&mut self, value: u16, endian: Endian) -> Result<()> {
        let bytes = match endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };
        self.push_bytes(&bytes)
    }

    pub fn push_u32(&mut self, value: u32, endian: Endian) -> Result<()> {
        let bytes = match endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };
        self.push_bytes(&bytes)
    }

    pub fn push_u64(&mut self, value: u64, endian: Endian) -> Result<()> {
        let bytes = match endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };
        self.push_bytes(&bytes)
    }

    /// Pops `n` raw bytes. On short input the reader collapses onto the
    /// writer (the whole remainder is consumed) and an error is returned.
    pub fn pop_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if n > self.available() {
            self.consume_all();
            return Err(RecordError::Underrun);
        }
        let start = self.reader;
        self.reader += n;
        Ok(self.buf[start..self.reader].to_vec())
    }

    pub fn pop_u8(&mut self) -> Result<u8> {
        Ok(self.pop_bytes(1)?[0])
    }

    pub fn pop_bool(&mut self) -> Result<bool> {
        Ok(self.pop_u8()? != 0)
    }

    pub fn pop_u16(&mut self, endian: Endian) -> Result<u16> {
        let b = self.pop_bytes(2)?;
        Ok(match endian {
            Endian::Big => u16::from_be_bytes([b[0], b[1]]),
            Endian::Little => u16::from_le_bytes([b[0], b[1]]),
        })
    }

    pub fn pop_u32(&mut self, endian: Endian) -> Result<u32> {
        let b = self.pop_bytes(4)?;
        Ok(match endian {
            Endian::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            Endian::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        })
    }

    pub fn pop_u64(&mut self, endian: Endian) -> Result<u64> {
        let b = self.pop_bytes(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(&b);
        Ok(match endian {
            Endian::Big => u64::from_be_bytes(a),
            Endian::Little => u64::from_le_bytes(a),
        })
    }

    /// Borrowed sub-record over the next `n` unread bytes; advances this
    /// record's reader without copying the backing bytes twice (the child
    /// still owns its own `Vec` snapshot since `Record` has no lifetime
    /// parameter, matching the rest of this crate's owned-value style).
    pub fn peek(&mut self, n: usize) -> Result<Record> {
        let bytes = self.pop_bytes(n)?;
        Ok(Record::from_filled(&bytes))
    }

    pub fn push_record(&mut self, other: &Record) -> Result<()> {
        self.push_bytes(other.as_written())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_u8() {
        let mut r = Record::with_capacity(16);
        r.push_u8(0xAB).unwrap();
        assert_eq!(r.pop_u8().unwrap(), 0xAB);
    }

    #[test]
    fn round_trip_u16_both_endians() {
        for endian in [Endian::Big, Endian::Little] {
            let mut r = Record::with_capacity(16);
            r.push_u16(0x1234, endian).unwrap();
            assert_eq!(r.pop_u16(endian).unwrap(), 0x1234);
        }
    }

    #[test]
    fn round_trip_u32_both_endians() {
        for endian in [Endian::Big, Endian::Little] {
            let mut r = Record::with_capacity(16);
            r.push_u32(0xDEAD_BEEF, endian).unwrap();
            assert_eq!(r.pop_u32(endian).unwrap(), 0xDEAD_BEEF);
        }
    }

    #[test]
    fn short_read_consumes_everything() {
        let mut r = Record::with_capacity(16);
        r.push_u8(1).unwrap();
        r.push_u8(2).unwrap();
        assert!(r.pop_bytes(10).is_err());
        assert_eq!(r.available(), 0);
    }

    #[test]
    fn rewind_resets_reader_only() {
        let mut r = Record::with_capacity(16);
        r.push_u8(7).unwrap();
        r.pop_u8().unwrap();
        assert_eq!(r.available(), 0);
        r.rewind();
        assert_eq!(r.available(), 1);
    }

    #[test]
    fn clear_resets_both_cursors() {
        let mut r = Record::with_capacity(16);
        r.push_u8(7).unwrap();
        r.clear();
        assert_eq!(r.length(), 0);
        assert_eq!(r.free(), 16);
    }

    #[test]
    fn peek_borrows_without_disturbing_length() {
        let mut r = Record::with_capacity(16);
        r.push_bytes(&[1, 2, 3, 4]).unwrap();
        let child = r.peek(2).unwrap();
        assert_eq!(child.as_written(), &[1, 2]);
        assert_eq!(r.available(), 2);
    }
}
