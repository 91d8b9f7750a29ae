//! In-memory record chunk.

use std::io::{self, prelude::*};

use rayon::prelude::*;

use crate::layout::RecordLayout;

/// Outcome of a chunk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRead {
    /// Valid bytes read, a whole number of records.
    pub bytes: usize,
    /// Trailing bytes dropped because they do not form a full record.
    pub discarded: usize,
}

/// Buffer holding up to one block of records.
///
/// Records stay where they were read, sorting permutes an index array instead.
/// The index costs one `u32` per record on top of the block itself, see [`RecordLayout::sort_memory`].
pub struct RecordBuffer {
    layout: RecordLayout,
    data: Vec<u8>,
    len: usize,
    order: Vec<u32>,
}

impl RecordBuffer {
    /// Creates a buffer of `layout.block_size()` bytes.
    pub fn new(layout: RecordLayout) -> Self {
        RecordBuffer {
            layout,
            data: vec![0; layout.block_size()],
            len: 0,
            order: Vec::with_capacity(layout.block_records()),
        }
    }

    /// Replaces buffer contents with up to one block read from `reader`.
    ///
    /// Reads until the buffer is full or the input ends, so a buffer that is not full afterwards
    /// means the input is exhausted. Bytes past the last full record are dropped.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<ChunkRead> {
        let mut filled = 0;
        while filled < self.data.len() {
            match reader.read(&mut self.data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        self.len = self.layout.align(filled);
        self.order.clear();
        // block records never exceed u32::MAX, see RecordLayout::new
        self.order.extend(0..self.len() as u32);

        return Ok(ChunkRead {
            bytes: self.len,
            discarded: filled - self.len,
        });
    }

    /// Returns the number of records in the buffer.
    pub fn len(&self) -> usize {
        self.len / self.layout.record_size()
    }

    /// Checks if the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Checks if the buffer holds a full block.
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Sorts records by key. Equal keys end up in no particular order.
    ///
    /// Runs on the current rayon thread pool.
    pub fn sort(&mut self) {
        let layout = &self.layout;
        let data = &self.data[..self.len];
        self.order
            .par_sort_unstable_by(|&a, &b| layout.key_at(data, a as usize).cmp(layout.key_at(data, b as usize)));
    }

    /// Returns records in their current order.
    pub fn records(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let record_size = self.layout.record_size();
        self.order
            .iter()
            .map(move |&idx| &self.data[idx as usize * record_size..(idx as usize + 1) * record_size])
    }

    /// Writes records to `writer` in their current order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for record in self.records() {
            writer.write_all(record)?;
        }
        return Ok(());
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{ChunkRead, RecordBuffer};
    use crate::layout::RecordLayout;

    #[test]
    fn test_record_buffer() {
        let layout = RecordLayout::new(2, 0, None, Some(4)).unwrap();
        let mut buffer = RecordBuffer::new(layout);
        let mut input = io::Cursor::new(vec![4u8, 0, 3, 0, 2, 0, 1, 0, 9, 9]);

        let read = buffer.fill_from(&mut input).unwrap();
        assert_eq!(read, ChunkRead { bytes: 8, discarded: 0 });
        assert_eq!(buffer.is_full(), true);
        assert_eq!(buffer.len(), 4);

        buffer.sort();
        let mut sorted = Vec::new();
        buffer.write_to(&mut sorted).unwrap();
        assert_eq!(sorted, vec![1, 0, 2, 0, 3, 0, 4, 0]);

        let read = buffer.fill_from(&mut input).unwrap();
        assert_eq!(read, ChunkRead { bytes: 2, discarded: 0 });
        assert_eq!(buffer.is_full(), false);
        assert_eq!(Vec::from_iter(buffer.records()), vec![&[9u8, 9][..]]);
    }

    #[rstest]
    #[case(vec![1, 2, 3, 4, 5], 4, 1)]
    #[case(vec![1, 2, 3], 0, 3)]
    #[case(vec![], 0, 0)]
    fn test_trailing_bytes(#[case] input: Vec<u8>, #[case] expected_bytes: usize, #[case] expected_discarded: usize) {
        let layout = RecordLayout::new(4, 0, None, Some(4)).unwrap();
        let mut buffer = RecordBuffer::new(layout);

        let read = buffer.fill_from(&mut io::Cursor::new(input)).unwrap();
        assert_eq!(read.bytes, expected_bytes);
        assert_eq!(read.discarded, expected_discarded);
        assert_eq!(buffer.is_full(), false);
        assert_eq!(buffer.len() * 4, expected_bytes);
    }

    #[test]
    fn test_sort_by_key_window() {
        // key is the second byte, first byte is payload
        let layout = RecordLayout::new(3, 1, Some(1), Some(4)).unwrap();
        let mut buffer = RecordBuffer::new(layout);
        let input = vec![b'a', 3, 0, b'b', 1, 0, b'c', 255, 0, b'd', 0, 0];
        buffer.fill_from(&mut io::Cursor::new(input)).unwrap();

        buffer.sort();
        let payload: Vec<u8> = buffer.records().map(|record| record[0]).collect();
        assert_eq!(payload, b"dbac".to_vec());
    }
}
