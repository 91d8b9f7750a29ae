//! Buffered reader over a single block of a file.

use std::fs;
use std::io;

use crate::layout::RecordLayout;
use crate::warning::{Warning, WarningFn};

/// Cursor buffer state after a refill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// A record is available.
    Ready,
    /// All records of the block have been consumed.
    EndOfBlock,
}

/// Bounded-memory reader yielding the records of one contiguous block in file order.
///
/// The cursor never reads past its block end. Refills use positioned reads,
/// so several cursors may share the same file regardless of its current offset.
pub struct StreamCursor<'a> {
    file: &'a fs::File,
    layout: &'a RecordLayout,
    on_warning: WarningFn<'a>,
    buf: Vec<u8>,
    capacity: usize,
    read_offset: usize,
    base_pos: u64,
    consumed: u64,
    block_len: u64,
}

impl<'a> StreamCursor<'a> {
    /// Creates a cursor over `block_len` bytes of `file` starting at `base_pos`.
    ///
    /// # Arguments
    /// * `capacity` - Buffer size. Clamped to the block length and rounded down to whole records.
    pub fn new(
        file: &'a fs::File,
        layout: &'a RecordLayout,
        on_warning: WarningFn<'a>,
        base_pos: u64,
        block_len: u64,
        capacity: usize,
    ) -> Self {
        let capacity = layout.align(capacity.min(usize::try_from(block_len).unwrap_or(usize::MAX)));

        StreamCursor {
            file,
            layout,
            on_warning,
            buf: Vec::with_capacity(capacity),
            capacity,
            read_offset: 0,
            base_pos,
            consumed: 0,
            block_len,
        }
    }

    /// Makes sure a record is buffered, reading the next part of the block if the buffer is drained.
    pub fn fill(&mut self) -> io::Result<Fill> {
        if self.read_offset < self.buf.len() {
            return Ok(Fill::Ready);
        }

        let remaining = self.block_len - self.consumed;
        let want = usize::try_from(remaining).map_or(self.capacity, |remaining| remaining.min(self.capacity));
        self.buf.resize(want, 0);
        self.read_offset = 0;

        let start = self.base_pos + self.consumed;
        let mut filled = 0;
        while filled < want {
            match read_at(self.file, &mut self.buf[filled..], start + filled as u64)? {
                0 => break,
                n => filled += n,
            }
        }
        self.consumed += filled as u64;

        let aligned = self.layout.align(filled);
        if aligned != filled {
            (self.on_warning)(&Warning::MisalignedRefill {
                offset: start + aligned as u64,
                discarded: filled - aligned,
            });
        }
        self.buf.truncate(aligned);

        if self.buf.is_empty() {
            // short block, nothing more can be read from it
            self.consumed = self.block_len;
            return Ok(Fill::EndOfBlock);
        }
        return Ok(Fill::Ready);
    }

    /// Returns the current record. Valid only after [`StreamCursor::fill`] returned [`Fill::Ready`].
    #[inline]
    pub fn record(&self) -> &[u8] {
        &self.buf[self.read_offset..self.read_offset + self.layout.record_size()]
    }

    /// Returns the current record key.
    #[inline]
    pub fn key(&self) -> &[u8] {
        self.layout.key(self.record())
    }

    /// Moves to the next record.
    #[inline]
    pub fn advance(&mut self) {
        self.read_offset += self.layout.record_size();
    }

    /// Returns all buffered records not read yet and marks them as read.
    pub fn drain(&mut self) -> &[u8] {
        let start = self.read_offset;
        self.read_offset = self.buf.len();
        &self.buf[start..]
    }

    #[cfg(test)]
    fn is_exhausted(&self) -> bool {
        self.read_offset >= self.buf.len() && self.consumed >= self.block_len
    }
}

/// Reads from `file` at `pos` without moving the file offset.
pub(crate) fn read_at(file: &fs::File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    loop {
        match positioned_read(file, buf, pos) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

#[cfg(unix)]
fn positioned_read(file: &fs::File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, pos)
}

#[cfg(windows)]
fn positioned_read(file: &fs::File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, pos)
}

#[cfg(not(any(unix, windows)))]
fn positioned_read(mut file: &fs::File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(pos))?;
    file.read(buf)
}
