//! External sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use crate::buffer::RecordBuffer;
use crate::layout::{ConfigError, RecordLayout};
use crate::merger::MergePass;
use crate::relocate::relocate;
use crate::warning::{self, Warning, WarningHandler};

/// Prefix of the temporary directory and of every temporary file.
const TMP_PREFIX: &str = "binsort";

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Invalid record layout.
    Config(ConfigError),
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Input opening or reading error.
    Input(io::Error),
    /// Output creation or finalization error.
    Output(io::Error),
    /// Intermediate data I/O error.
    IO(io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::Config(err) => err,
            SortError::TempDir(err) => err,
            SortError::ThreadPoolBuildError(err) => err,
            SortError::Input(err) => err,
            SortError::Output(err) => err,
            SortError::IO(err) => err,
        })
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Config(err) => write!(f, "invalid configuration: {}", err),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Input(err) => write!(f, "input read failed: {}", err),
            SortError::Output(err) => write!(f, "output write failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
        }
    }
}

impl From<ConfigError> for SortError {
    fn from(err: ConfigError) -> Self {
        SortError::Config(err)
    }
}

/// Sorting run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Bytes sorted, a whole number of records.
    pub bytes: u64,
    /// Trailing input bytes dropped because they do not form a full record.
    pub discarded: u64,
    /// Number of blocks sorted in memory.
    pub chunks: u64,
    /// Number of merge passes.
    pub passes: u32,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Record size in bytes.
    record_size: usize,
    /// Key offset within a record.
    key_offset: usize,
    /// Key length, up to the record end by default.
    key_length: Option<usize>,
    /// Number of records sorted in memory at once.
    block_records: Option<usize>,
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Sorted chunk file write buffer size.
    rw_buf_size: Option<usize>,
    /// Data warnings callback.
    warning_handler: Option<WarningHandler>,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder for records of `record_size` bytes with default parameters.
    pub fn new(record_size: usize) -> Self {
        ExternalSorterBuilder {
            record_size,
            key_offset: 0,
            key_length: None,
            block_records: None,
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            warning_handler: None,
        }
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    /// The record layout is validated before any file system access.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        let layout = RecordLayout::new(self.record_size, self.key_offset, self.key_length, self.block_records)?;

        ExternalSorter::new(
            layout,
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
            self.warning_handler.unwrap_or_else(warning::log_handler),
        )
    }

    /// Sets key offset within a record.
    pub fn with_key_offset(mut self, offset: usize) -> ExternalSorterBuilder {
        self.key_offset = offset;
        return self;
    }

    /// Sets key length.
    pub fn with_key_length(mut self, length: usize) -> ExternalSorterBuilder {
        self.key_length = Some(length);
        return self;
    }

    /// Sets number of records sorted in memory at once.
    pub fn with_block_records(mut self, records: usize) -> ExternalSorterBuilder {
        self.block_records = Some(records);
        return self;
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets sorted chunk write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets data warnings callback. Warnings go to the `log` facade by default.
    pub fn with_warning_handler(mut self, handler: WarningHandler) -> ExternalSorterBuilder {
        self.warning_handler = Some(handler);
        return self;
    }
}

/// File holding the current merge generation.
enum Generation {
    /// Temporary file owned by the sorter, removed once merged.
    Scratch(tempfile::NamedTempFile),
    /// Caller-owned file, never removed.
    Caller(fs::File),
}

impl Generation {
    fn file(&self) -> &fs::File {
        match self {
            Generation::Scratch(file) => file.as_file(),
            Generation::Caller(file) => file,
        }
    }

    fn discard(self) {
        if let Generation::Scratch(file) = self {
            if let Err(err) = file.close() {
                log::warn!("temporary file not removed: {}", err);
            }
        }
    }
}

/// External sorter of fixed-length records.
///
/// Sorting runs in two phases. First the input is read block by block, each block is sorted in memory
/// and written to a temporary file. Then adjacent blocks are merged pairwise, pass after pass,
/// doubling the block size each time until the whole file is a single sorted block.
pub struct ExternalSorter {
    /// Record layout.
    layout: RecordLayout,
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: tempfile::TempDir,
    /// Sorted chunk file write buffer size.
    rw_buf_size: Option<usize>,
    /// Data warnings callback.
    warning_handler: WarningHandler,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `layout` - Record layout.
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Sorted chunk file write buffer size.
    /// * `warning_handler` - Data warnings callback.
    pub fn new(
        layout: RecordLayout,
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
        warning_handler: WarningHandler,
    ) -> Result<Self, SortError> {
        return Ok(ExternalSorter {
            layout,
            rw_buf_size,
            warning_handler,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TMP_PREFIX);

        let tmp_dir = if let Some(tmp_path) = tmp_path {
            builder.tempdir_in(tmp_path)
        } else {
            builder.tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Returns the record layout.
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Returns the directory temporary files are created in.
    pub fn tmp_dir(&self) -> &Path {
        self.tmp_dir.path()
    }

    /// Sorts records of the `input` file into the `output` file.
    ///
    /// The input is fully read before the output is created, so both may be the same path.
    /// Trailing input bytes that do not form a full record are dropped with a warning.
    ///
    /// # Arguments
    /// * `input` - File to be sorted
    /// * `output` - Result file, replaced if it exists
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortStats, SortError> {
        let input_file = fs::File::open(input).map_err(SortError::Input)?;
        log::info!("sorting {} into {}", input.display(), output.display());

        self.sort_reader(input_file, output)
    }

    /// Sorts records read from `input` into the `output` file.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `output` - Result file, replaced if it exists
    pub fn sort_reader<R: Read>(&self, mut input: R, output: &Path) -> Result<SortStats, SortError> {
        let mut sorted = self.create_tmp_file()?;
        let mut stats = self.sort_blocks(&mut input, sorted.as_file_mut())?;
        drop(input);

        log::info!(
            "{} blocks sorted ({} bytes, {} dropped)",
            stats.chunks,
            stats.bytes,
            stats.discarded
        );

        stats.passes = self.merge(Generation::Scratch(sorted), stats.bytes, output)?;

        log::info!("sorting done ({} merge passes)", stats.passes);

        return Ok(stats);
    }

    /// Merges a file made of sorted blocks of `layout().block_size()` bytes into the `output` file.
    ///
    /// The input file is left untouched and must not be the output file.
    pub fn merge_sorted(&self, input: &Path, output: &Path) -> Result<SortStats, SortError> {
        if let (Ok(input), Ok(output)) = (input.canonicalize(), output.canonicalize()) {
            if input == output {
                return Err(SortError::Output(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "output overwrites the input",
                )));
            }
        }

        let input_file = fs::File::open(input).map_err(SortError::Input)?;
        let len = input_file.metadata().map_err(SortError::Input)?.len();

        let record_size = self.layout.record_size() as u64;
        let total_size = len - len % record_size;
        if total_size != len {
            (self.warning_handler)(&Warning::TrailingBytes {
                offset: total_size,
                discarded: (len - total_size) as usize,
            });
        }

        let block_size = self.layout.block_size() as u64;
        let passes = self.merge(Generation::Caller(input_file), total_size, output)?;

        return Ok(SortStats {
            bytes: total_size,
            discarded: len - total_size,
            chunks: (total_size + block_size - 1) / block_size,
            passes,
        });
    }

    fn create_tmp_file(&self) -> Result<tempfile::NamedTempFile, SortError> {
        tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempfile_in(self.tmp_dir.path())
            .map_err(|err| SortError::TempDir(err))
    }

    /// Sorts the input block by block into `sorted`, the blocks are written one after another.
    fn sort_blocks<R: Read>(&self, input: &mut R, sorted: &mut fs::File) -> Result<SortStats, SortError> {
        let mut buffer = RecordBuffer::new(self.layout);
        let mut chunk_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, sorted),
            None => io::BufWriter::new(sorted),
        };
        let mut stats = SortStats::default();

        loop {
            let read = buffer.fill_from(input).map_err(SortError::Input)?;

            if read.discarded > 0 {
                (self.warning_handler)(&Warning::TrailingBytes {
                    offset: stats.bytes + read.bytes as u64,
                    discarded: read.discarded,
                });
                stats.discarded += read.discarded as u64;
            }

            if !buffer.is_empty() {
                log::debug!("sorting chunk {} ({} records) ...", stats.chunks, buffer.len());
                self.thread_pool.install(|| {
                    buffer.sort();
                });

                log::debug!("saving chunk data");
                buffer.write_to(&mut chunk_writer).map_err(SortError::IO)?;

                stats.bytes += read.bytes as u64;
                stats.chunks += 1;
            }

            // fill_from stops short of a full block only at the input end
            if !buffer.is_full() {
                break;
            }
        }

        chunk_writer.flush().map_err(SortError::IO)?;

        return Ok(stats);
    }

    /// Merges sorted blocks of `generation` until a single block is left and stores it as `output`.
    /// Returns the number of merge passes.
    fn merge(&self, mut generation: Generation, total_size: u64, output: &Path) -> Result<u32, SortError> {
        let block_size = self.layout.block_size() as u64;

        if total_size <= block_size {
            log::debug!("data fits in a single block, no merge needed");
            self.finish_single_block(generation, total_size, output)?;
            return Ok(0);
        }

        let mut merge_block_size = block_size;
        let mut passes = 0;

        loop {
            let pass = MergePass::new(&self.layout, &*self.warning_handler, merge_block_size, total_size);
            let last = pass.is_last();

            log::debug!(
                "merging {} blocks of {} bytes (last pass: {})",
                pass.block_count(),
                merge_block_size,
                last
            );

            if last {
                self.run_last_pass(&pass, generation.file(), output)?;
                generation.discard();
                return Ok(passes + 1);
            }

            let mut next = self.create_tmp_file()?;
            self.run_pass(&pass, generation.file(), next.as_file_mut())
                .map_err(SortError::IO)?;

            generation.discard();
            generation = Generation::Scratch(next);
            merge_block_size *= 2;
            passes += 1;
        }
    }

    fn run_pass<W: Write>(&self, pass: &MergePass, input: &fs::File, output: W) -> io::Result<u64> {
        let mut writer = io::BufWriter::with_capacity(self.layout.output_buffer_size(), output);
        let written = pass.run(input, &mut writer)?;
        writer.flush()?;

        return Ok(written);
    }

    fn run_last_pass(&self, pass: &MergePass, input: &fs::File, output: &Path) -> Result<(), SortError> {
        let output_file = fs::File::create(output).map_err(SortError::Output)?;

        if let Err(err) = self.run_pass(pass, input, &output_file) {
            drop(output_file);
            let _ = fs::remove_file(output);
            return Err(SortError::IO(err));
        }

        return Ok(());
    }

    fn finish_single_block(&self, generation: Generation, total_size: u64, output: &Path) -> Result<(), SortError> {
        match generation {
            Generation::Scratch(file) => {
                let path = file.into_temp_path();
                let relocation = relocate(&path, output).map_err(SortError::Output)?;
                log::debug!("{} moved to {} ({:?})", path.display(), output.display(), relocation);
                // nothing is left at the temporary path
                let _ = path.keep();
            }
            Generation::Caller(file) => {
                let mut output_file = fs::File::create(output).map_err(SortError::Output)?;
                if let Err(err) = io::copy(&mut file.take(total_size), &mut output_file) {
                    drop(output_file);
                    let _ = fs::remove_file(output);
                    return Err(SortError::Output(err));
                }
            }
        }

        return Ok(());
    }
}
