//! `binsort` sorts files of fixed-length binary records by a byte window of each record,
//! even when the file is far larger than the available memory.
//!
//! Sorting is achieved in two phases. During the first phase the input is read in blocks that fit in memory,
//! each block is sorted and written to a temporary file. During the second phase adjacent sorted blocks are
//! merged pairwise, pass after pass, doubling the block size until the whole file is a single sorted run.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Raw records:**
//!   input and output are plain concatenations of records, no header or delimiter.
//!   Trailing bytes that do not form a full record are dropped with a warning.
//! * **Byte keys:**
//!   records are compared by the `[offset, offset + length)` window as unsigned bytes.
//!   The sort is not stable.
//! * **Bounded memory:**
//!   at most one block of records is held in memory in either phase.
//!
//! # Example
//!
//! ```no_run
//! use std::path;
//!
//! use log;
//!
//! use binsort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     // 32-byte records sorted by the 8 bytes starting at byte 16
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new(32)
//!         .with_key_offset(16)
//!         .with_key_length(8)
//!         .with_block_records(1 << 15)
//!         .with_tmp_dir(path::Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     let stats = sorter.sort(path::Path::new("input.bin"), path::Path::new("output.bin")).unwrap();
//!     log::info!("{} bytes sorted in {} merge passes", stats.bytes, stats.passes);
//! }
//! ```

pub mod buffer;
pub mod cursor;
pub mod layout;
pub mod merger;
pub mod relocate;
pub mod sort;
pub mod warning;

pub use buffer::RecordBuffer;
pub use cursor::{Fill, StreamCursor};
pub use layout::{ConfigError, RecordLayout};
pub use merger::{BlockMerger, MergePass};
pub use relocate::{relocate, Relocation};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortStats};
pub use warning::{Warning, WarningFn, WarningHandler};
