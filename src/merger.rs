//! Block merger and merge pass.

use std::fs;
use std::io::{self, prelude::*};

use crate::cursor::{self, Fill, StreamCursor};
use crate::layout::RecordLayout;
use crate::warning::WarningFn;

/// Merges sorted blocks into a single sorted run.
///
/// Cursors are ranked by the order they are passed in: on equal keys the record of the earlier cursor
/// goes first. This does not make the whole sort stable since chunks are sorted with an unstable sort.
pub struct BlockMerger<'a> {
    cursors: Vec<StreamCursor<'a>>,
}

impl<'a> BlockMerger<'a> {
    /// Creates a merger over the provided cursors.
    /// Every cursor block should be sorted in ascending key order otherwise the result is undefined.
    pub fn new<I>(cursors: I) -> Self
    where
        I: IntoIterator<Item = StreamCursor<'a>>,
    {
        BlockMerger {
            cursors: Vec::from_iter(cursors),
        }
    }

    /// Writes merged records to `writer` until every cursor is exhausted.
    /// Returns the number of bytes written.
    pub fn merge_into<W: Write>(mut self, writer: &mut W) -> io::Result<u64> {
        let mut written = 0;

        loop {
            let mut idx = 0;
            while idx < self.cursors.len() {
                match self.cursors[idx].fill()? {
                    Fill::Ready => idx += 1,
                    Fill::EndOfBlock => {
                        self.cursors.remove(idx);
                    }
                }
            }

            match self.cursors.len() {
                0 => break,
                1 => {
                    let records = self.cursors[0].drain();
                    writer.write_all(records)?;
                    written += records.len() as u64;
                }
                _ => {
                    let mut min = 0;
                    for idx in 1..self.cursors.len() {
                        if self.cursors[idx].key() < self.cursors[min].key() {
                            min = idx;
                        }
                    }

                    let record = self.cursors[min].record();
                    writer.write_all(record)?;
                    written += record.len() as u64;
                    self.cursors[min].advance();
                }
            }
        }

        return Ok(written);
    }
}

/// One sweep over a generation: merges blocks `2k` and `2k + 1` for every `k`
/// and copies an unpaired trailing block as is.
pub struct MergePass<'a> {
    layout: &'a RecordLayout,
    on_warning: WarningFn<'a>,
    block_size: u64,
    total_size: u64,
}

impl<'a> MergePass<'a> {
    /// Creates a merge pass.
    ///
    /// # Arguments
    /// * `block_size` - Size of the sorted blocks of the input generation. The last block may be shorter.
    /// * `total_size` - Size of the input generation, a whole number of records.
    pub fn new(
        layout: &'a RecordLayout,
        on_warning: WarningFn<'a>,
        block_size: u64,
        total_size: u64,
    ) -> Self {
        MergePass {
            layout,
            on_warning,
            block_size,
            total_size,
        }
    }

    /// Returns the number of blocks of the input generation.
    pub fn block_count(&self) -> u64 {
        (self.total_size + self.block_size - 1) / self.block_size
    }

    /// Checks if the pass produces a single sorted block.
    pub fn is_last(&self) -> bool {
        self.block_size * 2 >= self.total_size
    }

    /// Merges `input` generation into `writer`. Returns the number of bytes written.
    pub fn run<W: Write>(&self, input: &fs::File, writer: &mut W) -> io::Result<u64> {
        let blocks = self.block_count();
        let buf_size = self.layout.input_buffer_size();
        let mut written = 0;

        for pair in 0..blocks / 2 {
            let left = pair * 2 * self.block_size;
            let right = left + self.block_size;
            let right_len = self.block_size.min(self.total_size - right);

            log::trace!(
                "merging blocks {}-{} ({}-{} bytes)",
                pair * 2,
                pair * 2 + 1,
                left,
                right + right_len
            );

            let merger = BlockMerger::new([
                StreamCursor::new(input, self.layout, self.on_warning, left, self.block_size, buf_size),
                StreamCursor::new(input, self.layout, self.on_warning, right, right_len, buf_size),
            ]);
            written += merger.merge_into(writer)?;
        }

        if blocks % 2 == 1 {
            let tail = (blocks - 1) * self.block_size;
            let tail_len = self.total_size - tail;
            log::trace!("copying trailing block {} ({}-{} bytes)", blocks - 1, tail, self.total_size);

            let mut buf = vec![0; buf_size];
            let mut copied = 0;
            while copied < tail_len {
                let want = buf.len().min(usize::try_from(tail_len - copied).unwrap_or(usize::MAX));
                let n = cursor::read_at(input, &mut buf[..want], tail + copied)?;
                if n == 0 {
                    break;
                }
                writer.write_all(&buf[..n])?;
                copied += n as u64;
            }
            if copied != tail_len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("trailing block truncated ({} of {} bytes)", copied, tail_len),
                ));
            }
            written += copied;
        }

        return Ok(written);
    }
}
