//! Record layout: record size, key window and in-memory block size.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::ops::Range;

/// Minimum number of records held in memory at once.
/// Merging splits the block into two input quarters and an output half, each must hold a record.
pub const MIN_BLOCK_RECORDS: usize = 4;

/// Default in-memory block size in bytes used when the number of records is not set.
pub const DEFAULT_BLOCK_BYTES: usize = 1 << 20;

/// Maximum number of records held in memory at once, the sort index stores `u32` positions.
pub const MAX_BLOCK_RECORDS: usize = u32::MAX as usize;

/// Record layout validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Record size is zero.
    ZeroRecordSize,
    /// Key window does not fit in a record.
    KeyOutOfBounds {
        offset: usize,
        length: usize,
        record_size: usize,
    },
    /// Block size in bytes does not fit in `usize` or has more than [`MAX_BLOCK_RECORDS`] records.
    BlockSizeOverflow { records: usize, record_size: usize },
}

impl Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConfigError::ZeroRecordSize => write!(f, "record size must be > 0"),
            ConfigError::KeyOutOfBounds {
                offset,
                length,
                record_size,
            } => write!(
                f,
                "key offset + length > record size ({} + {} > {})",
                offset, length, record_size
            ),
            ConfigError::BlockSizeOverflow { records, record_size } => write!(
                f,
                "block size too large ({} records of {} bytes)",
                records, record_size
            ),
        }
    }
}

/// Fixed-length record layout. Immutable for a sorting run.
///
/// Keys are the `[key_start, key_end)` window of each record and compare as raw unsigned bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    record_size: usize,
    key_start: usize,
    key_end: usize,
    block_size: usize,
}

impl RecordLayout {
    /// Creates a validated record layout.
    ///
    /// # Arguments
    /// * `record_size` - Record size in bytes
    /// * `key_offset` - Key start offset within a record
    /// * `key_length` - Key length. If the parameter is [`None`] the key spans up to the end of the record.
    /// * `block_records` - Number of records sorted in memory at once. If the parameter is [`None`]
    ///   it is derived from [`DEFAULT_BLOCK_BYTES`]. The value is never lower than [`MIN_BLOCK_RECORDS`]
    ///   and must not exceed [`MAX_BLOCK_RECORDS`].
    pub fn new(
        record_size: usize,
        key_offset: usize,
        key_length: Option<usize>,
        block_records: Option<usize>,
    ) -> Result<Self, ConfigError> {
        if record_size == 0 {
            return Err(ConfigError::ZeroRecordSize);
        }

        let key_length = match key_length {
            Some(length) => length,
            None => record_size.saturating_sub(key_offset),
        };
        let key_end = key_offset.checked_add(key_length);
        let key_end = match key_end {
            Some(key_end) if key_offset <= record_size && key_end <= record_size => key_end,
            _ => {
                return Err(ConfigError::KeyOutOfBounds {
                    offset: key_offset,
                    length: key_length,
                    record_size,
                })
            }
        };

        let records = block_records
            .unwrap_or(DEFAULT_BLOCK_BYTES / record_size)
            .max(MIN_BLOCK_RECORDS);
        let block_size = records
            .checked_mul(record_size)
            .filter(|_| records <= MAX_BLOCK_RECORDS)
            .ok_or(ConfigError::BlockSizeOverflow { records, record_size })?;

        return Ok(RecordLayout {
            record_size,
            key_start: key_offset,
            key_end,
            block_size,
        });
    }

    /// Returns record size in bytes.
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Returns the key window within a record.
    pub fn key_range(&self) -> Range<usize> {
        self.key_start..self.key_end
    }

    /// Returns in-memory block size in bytes. Always a multiple of the record size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns in-memory block size in records.
    pub fn block_records(&self) -> usize {
        self.block_size / self.record_size
    }

    /// Returns memory used by the block sort phase in bytes: the block plus one `u32` index entry per record.
    pub fn sort_memory(&self) -> usize {
        self.block_size
            .saturating_add(self.block_records().saturating_mul(std::mem::size_of::<u32>()))
    }

    /// Returns the key of a record.
    #[inline]
    pub fn key<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[self.key_start..self.key_end]
    }

    /// Returns the key of the `idx`-th record of a buffer of consecutive records.
    #[inline]
    pub fn key_at<'a>(&self, records: &'a [u8], idx: usize) -> &'a [u8] {
        let base = idx * self.record_size;
        &records[base + self.key_start..base + self.key_end]
    }

    /// Rounds a byte length down to a whole number of records.
    #[inline]
    pub fn align(&self, len: usize) -> usize {
        len - len % self.record_size
    }

    /// Buffer size of each of the two merge input cursors (a quarter of the block).
    pub fn input_buffer_size(&self) -> usize {
        self.align(self.block_size / 4).max(self.record_size)
    }

    /// Buffer size of the merge output writer (what the block has left after both inputs).
    pub fn output_buffer_size(&self) -> usize {
        let size = self.block_size.saturating_sub(self.input_buffer_size() * 2);
        self.align(size).max(self.record_size)
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{ConfigError, RecordLayout, MAX_BLOCK_RECORDS};

    #[rstest]
    #[case(4, 0, None, 0..4)]
    #[case(32, 16, Some(8), 16..24)]
    #[case(32, 16, None, 16..32)]
    #[case(8, 8, None, 8..8)]
    #[case(8, 3, Some(0), 3..3)]
    fn test_key_range(
        #[case] record_size: usize,
        #[case] offset: usize,
        #[case] length: Option<usize>,
        #[case] expected: std::ops::Range<usize>,
    ) {
        let layout = RecordLayout::new(record_size, offset, length, None).unwrap();
        assert_eq!(layout.key_range(), expected);
    }

    #[rstest]
    #[case(0, 0, None, ConfigError::ZeroRecordSize)]
    #[case(8, 4, Some(5), ConfigError::KeyOutOfBounds { offset: 4, length: 5, record_size: 8 })]
    #[case(8, 9, None, ConfigError::KeyOutOfBounds { offset: 9, length: 0, record_size: 8 })]
    #[case(8, usize::MAX, Some(2), ConfigError::KeyOutOfBounds { offset: usize::MAX, length: 2, record_size: 8 })]
    fn test_invalid_layout(
        #[case] record_size: usize,
        #[case] offset: usize,
        #[case] length: Option<usize>,
        #[case] expected: ConfigError,
    ) {
        assert_eq!(RecordLayout::new(record_size, offset, length, None), Err(expected));
    }

    #[rstest]
    #[case(4, None, 262144)]
    #[case(1 << 19, None, 4)]
    #[case(3 << 20, None, 4)]
    #[case(4, Some(1), 4)]
    #[case(4, Some(250), 250)]
    fn test_block_records(#[case] record_size: usize, #[case] records: Option<usize>, #[case] expected: usize) {
        let layout = RecordLayout::new(record_size, 0, None, records).unwrap();
        assert_eq!(layout.block_records(), expected);
        assert_eq!(layout.block_size(), expected * record_size);
    }

    #[test]
    fn test_block_size_overflow() {
        let err = RecordLayout::new(1 << 20, 0, None, Some(usize::MAX)).unwrap_err();
        assert!(matches!(err, ConfigError::BlockSizeOverflow { .. }));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_block_records_exceed_index() {
        let err = RecordLayout::new(1, 0, None, Some(MAX_BLOCK_RECORDS + 1)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::BlockSizeOverflow {
                records: MAX_BLOCK_RECORDS + 1,
                record_size: 1
            }
        );
    }

    #[rstest]
    #[case(4, 4, 16 + 16)]
    #[case(32, 1000, 32000 + 4000)]
    fn test_sort_memory(#[case] record_size: usize, #[case] records: usize, #[case] expected: usize) {
        let layout = RecordLayout::new(record_size, 0, None, Some(records)).unwrap();
        assert_eq!(layout.sort_memory(), expected);
    }

    #[rstest]
    #[case(4, 4, 4, 8)]
    #[case(4, 1000, 1000, 2000)]
    #[case(3, 10, 6, 18)]
    fn test_merge_buffer_split(
        #[case] record_size: usize,
        #[case] records: usize,
        #[case] expected_input: usize,
        #[case] expected_output: usize,
    ) {
        let layout = RecordLayout::new(record_size, 0, None, Some(records)).unwrap();
        assert_eq!(layout.input_buffer_size(), expected_input);
        assert_eq!(layout.output_buffer_size(), expected_output);
        assert!(layout.input_buffer_size() * 2 + layout.output_buffer_size() <= layout.block_size());
    }

    #[test]
    fn test_key() {
        let layout = RecordLayout::new(4, 1, Some(2), None).unwrap();
        let records = [0u8, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(layout.key(&records[..4]), &[1, 2]);
        assert_eq!(layout.key_at(&records, 1), &[5, 6]);
        assert_eq!(layout.align(7), 4);
    }
}
