use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use binsort::{ExternalSorter, ExternalSorterBuilder, SortError};

const EXAMPLES: &str = "EXAMPLES:
    Sort a file composed of 32-bytes records, by comparing only 8 bytes,
    starting at byte 16 in each record:

        binsort --size 32 --offset 16 --length 8 ./input ./output";

fn main() {
    let mut app = build_app();
    let arg_parser = app.get_matches_mut();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let record_size: usize = arg_parser.value_of_t_or_exit("size");
    let key_offset: usize = arg_parser.value_of_t_or_exit("offset");
    // zero length means up to the record end
    let key_length: Option<usize> = arg_parser
        .is_present("length")
        .then(|| arg_parser.value_of_t_or_exit("length"))
        .filter(|length: &usize| *length > 0);
    let block_records = block_records(&arg_parser, record_size);
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");

    let input = path::Path::new(arg_parser.value_of("input").expect("value is required"));
    let output = path::Path::new(arg_parser.value_of("output").expect("value is required"));

    let mut sorter_builder = ExternalSorterBuilder::new(record_size).with_key_offset(key_offset);
    if let Some(key_length) = key_length {
        sorter_builder = sorter_builder.with_key_length(key_length);
    }

    if let Some(block_records) = block_records {
        sorter_builder = sorter_builder.with_block_records(block_records);
    }

    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let sorter: ExternalSorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(SortError::Config(err)) => app.error(clap::ErrorKind::ValueValidation, err).exit(),
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    log::info!(
        "sorting {}-byte records by bytes {:?}, {} records per block ({} with the sort index)",
        sorter.layout().record_size(),
        sorter.layout().key_range(),
        sorter.layout().block_records(),
        ByteSize(sorter.layout().sort_memory() as u64),
    );

    let stats = match sorter.sort(input, output) {
        Ok(stats) => stats,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };

    log::info!(
        "{} sorted into {} ({} blocks, {} merge passes, {} trailing bytes dropped)",
        ByteSize(stats.bytes),
        output.display(),
        stats.chunks,
        stats.passes,
        stats.discarded,
    );
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

/// Returns records per block from `--block-size` or `--memory`, [`None`] means the default.
/// Zero block size means the default, memory is shared by the records and their `u32` sort index.
fn block_records(arg_parser: &clap::ArgMatches, record_size: usize) -> Option<usize> {
    if arg_parser.is_present("block_size") {
        return Some(arg_parser.value_of_t_or_exit("block_size")).filter(|records: &usize| *records > 0);
    }

    let memory = arg_parser.value_of("memory")?;
    let memory = memory.parse::<ByteSize>().expect("value is pre-validated").as_u64();
    let per_record = record_size.saturating_add(std::mem::size_of::<u32>());
    return Some(usize::try_from(memory).unwrap_or(usize::MAX) / per_record);
}

fn parse_count(value: &str, min: usize) -> Result<(), String> {
    match value.parse::<usize>() {
        Ok(count) if count >= min => Ok(()),
        Ok(_) => Err(format!("value must be >= {}", min)),
        Err(err) => Err(format!("not a number: {}", err)),
    }
}

fn build_app() -> clap::App<'static> {
    clap::App::new("binsort")
        .about("sorts files of fixed-length binary records")
        .after_help(EXAMPLES)
        .arg(
            clap::Arg::new("size")
                .short('s')
                .long("size")
                .value_name("BYTES")
                .help("record size in bytes")
                .required(true)
                .takes_value(true)
                .validator(|v| parse_count(v, 1)),
        )
        .arg(
            clap::Arg::new("offset")
                .short('o')
                .long("offset")
                .value_name("BYTES")
                .help("ignore the first bytes in record for sorting")
                .takes_value(true)
                .default_value("0")
                .validator(|v| parse_count(v, 0)),
        )
        .arg(
            clap::Arg::new("length")
                .short('l')
                .long("length")
                .value_name("BYTES")
                .help("use only length bytes for sorting, defaults to size - offset")
                .takes_value(true)
                .validator(|v| parse_count(v, 0)),
        )
        .arg(
            clap::Arg::new("block_size")
                .short('b')
                .long("block-size")
                .value_name("RECORDS")
                .help("number of records sorted at once, 0 or unset means 1MiB worth of records (at least 4)")
                .takes_value(true)
                .validator(|v| parse_count(v, 0)),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .value_name("SIZE")
                .help("memory to sort with, including the sort index, an alternative to --block-size")
                .takes_value(true)
                .conflicts_with("block_size")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('T')
                .long("temporary-directory")
                .value_name("DIR")
                .help("directory to be used to store temporary data, may need as much space as the input")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for in-memory sorting")
                .takes_value(true)
                .validator(|v| parse_count(v, 1)),
        )
        .arg(
            clap::Arg::new("log_level")
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("input")
                .help("file to be sorted")
                .required(true)
                .index(1),
        )
        .arg(
            clap::Arg::new("output")
                .help("result file")
                .required(true)
                .index(2),
        )
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
