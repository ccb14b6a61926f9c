use std::cmp::Ordering;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use csv;
use env_logger;
use log;

use spillsort::{ExternalSorter, ExternalSorterBuilder, RecordSink};

/// Delimited text record, one field per column.
type Record = Vec<String>;

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = arg_parser.value_of("input").filter(|&input| input != "-").map(Path::new);
    let output = arg_parser.value_of("output").filter(|&output| output != "-").map(Path::new);

    let result = parse_options(&arg_parser).and_then(|options| run(input, output, &options));
    if let Err(err) = result {
        log::error!("{}", err);
        process::exit(1);
    }
}

/// Sorting parameters.
struct SortOptions {
    /// Zero-based key columns in priority order.
    keys: Vec<usize>,
    order: Order,
    delimiter: u8,
    /// Pass the first record through unsorted.
    header: bool,
    chunk_size: usize,
    tmp_dir: Option<PathBuf>,
    rw_buf_size: Option<usize>,
}

impl Default for SortOptions {
    fn default() -> Self {
        SortOptions {
            keys: vec![0],
            order: Order::Asc,
            delimiter: b',',
            header: false,
            chunk_size: 100_000,
            tmp_dir: None,
            rw_buf_size: None,
        }
    }
}

fn parse_options(arg_parser: &clap::ArgMatches) -> Result<SortOptions, String> {
    let rw_buf_size = match arg_parser.value_of("rw_buf_size") {
        Some(buf_size) => Some(parse_buf_size(buf_size)?),
        None => None,
    };

    return Ok(SortOptions {
        keys: parse_keys(arg_parser.value_of("key").unwrap_or("0"))?,
        order: arg_parser.value_of_t_or_exit("sort"),
        delimiter: parse_delimiter(arg_parser.value_of("delimiter").unwrap_or(","))?,
        header: arg_parser.is_present("header"),
        chunk_size: arg_parser.value_of_t_or_exit("chunk_size"),
        tmp_dir: arg_parser.value_of("tmp_dir").map(PathBuf::from),
        rw_buf_size,
    });
}

/// Sorts the input file (stdin if [`None`]) into the output file (stdout if [`None`]).
/// Returns the number of sorted records.
///
/// The output file is replaced only if the sort succeeds, otherwise it is left untouched.
fn run(input: Option<&Path>, output: Option<&Path>, options: &SortOptions) -> Result<u64, String> {
    let input_stream: Box<dyn Read> = match input {
        Some(path) => {
            let file = fs::File::open(path).map_err(|err| format!("input file opening error: {}", err))?;
            Box::new(file)
        }
        None => Box::new(io::stdin()),
    };

    let count = match output {
        Some(path) => {
            // the result is written next to the destination and moved over it only once the sort succeeds
            let mut output_file =
                create_output_file(path).map_err(|err| format!("output file creation error: {}", err))?;
            let count = sort_records(input_stream, &mut output_file, options)?;
            output_file
                .persist(path)
                .map_err(|err| format!("output file saving error: {}", err))?;
            count
        }
        None => sort_records(input_stream, io::stdout(), options)?,
    };

    log::info!("{} records written", count);

    return Ok(count);
}

/// Sorts delimited records read from the input and writes them to the output.
fn sort_records<R: Read, W: Write>(input: R, output: W, options: &SortOptions) -> Result<u64, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .from_writer(output);
    let mut sink = CsvSink::new(writer);

    let mut records = reader
        .records()
        .map(|record| record.map(|record| record.iter().map(String::from).collect::<Record>()));
    if options.header {
        match records.next() {
            Some(Ok(header)) => sink
                .emit(header)
                .map_err(|err| format!("data saving error: {}", err))?,
            Some(Err(err)) => return Err(format!("input data stream error: {}", err)),
            None => {}
        }
    }

    let mut sorter_builder = ExternalSorterBuilder::new().with_chunk_size(options.chunk_size);
    if let Some(tmp_dir) = &options.tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
    }
    if let Some(rw_buf_size) = options.rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size);
    }

    let sorter: ExternalSorter<Record, csv::Error> = sorter_builder
        .build()
        .map_err(|err| format!("sorter initialization error: {}", err))?;

    let keys = options.keys.as_slice();
    let order = options.order;
    let compare = move |a: &Record, b: &Record| {
        let ordering = compare_keys(a, b, keys);
        match order {
            Order::Asc => ordering,
            Order::Desc => ordering.reverse(),
        }
    };

    return sorter
        .sort_by_into(records, &mut sink, compare)
        .map_err(|err| format!("data sorting error: {}", err));
}

fn create_output_file(path: &Path) -> io::Result<tempfile::NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    tempfile::Builder::new().prefix(".spillsort-").tempfile_in(dir)
}

fn parse_keys(keys: &str) -> Result<Vec<usize>, String> {
    keys.split(',')
        .map(|key| {
            key.trim()
                .parse::<usize>()
                .map_err(|err| format!("key column '{}' format incorrect: {}", key, err))
        })
        .collect()
}

/// Parses a single ASCII character delimiter. `\t` stands for a tab.
fn parse_delimiter(delimiter: &str) -> Result<u8, String> {
    if delimiter == "\\t" {
        return Ok(b'\t');
    }

    let mut chars = delimiter.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii() => Ok(c as u8),
        _ => Err(format!("Delimiter must be a single ASCII character: '{}'", delimiter)),
    }
}

fn parse_buf_size(buf_size: &str) -> Result<usize, String> {
    let buf_size: ByteSize = buf_size
        .parse()
        .map_err(|err| format!("Buffer size format incorrect: {}", err))?;

    usize::try_from(buf_size.as_u64()).map_err(|err| format!("Buffer size {} is too large: {}", buf_size, err))
}

fn field(record: &Record, column: usize) -> &str {
    record.get(column).map(String::as_str).unwrap_or("")
}

/// Compares records column by column. Missing columns compare as empty fields.
fn compare_keys(a: &Record, b: &Record, keys: &[usize]) -> Ordering {
    keys.iter()
        .map(|&column| field(a, column).cmp(field(b, column)))
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Writes records as delimited text, quoting fields where necessary.
struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    fn new(writer: csv::Writer<W>) -> Self {
        CsvSink { writer }
    }
}

impl<W: Write> RecordSink<Record> for CsvSink<W> {
    fn emit(&mut self, record: Record) -> io::Result<()> {
        self.writer.write_record(&record).map_err(io::Error::from)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
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

#[derive(Copy, Clone, clap::ArgEnum)]
enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Order::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Order as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("spillsort")
        .about("external sorter of delimited text records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted (stdin if omitted or '-')")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file (stdout if omitted or '-')")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("key")
                .short('k')
                .long("key")
                .help("comma separated zero-based columns to sort by")
                .takes_value(true)
                .default_value("0")
                .validator(|v| parse_keys(v).map(|_| ())),
        )
        .arg(
            clap::Arg::new("delimiter")
                .short('t')
                .long("delimiter")
                .help("field delimiter")
                .takes_value(true)
                .default_value(",")
                .validator(|v| parse_delimiter(v).map(|_| ())),
        )
        .arg(
            clap::Arg::new("header")
                .long("header")
                .help("pass the first line through unsorted"),
        )
        .arg(
            clap::Arg::new("sort")
                .short('s')
                .long("sort")
                .help("sorting order")
                .takes_value(true)
                .default_value("asc")
                .possible_values(Order::possible_values()),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("number of records sorted in memory at once")
                .takes_value(true)
                .default_value("100000")
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("Chunk size must be at least 1".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .long("rw-buf-size")
                .help("temporary file read/write buffer size")
                .takes_value(true)
                .validator(|v| parse_buf_size(v).map(|_| ())),
        )
        .get_matches()
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

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::fs;
    use std::path::Path;

    use rstest::*;

    use super::{
        compare_keys, parse_buf_size, parse_delimiter, parse_keys, run, sort_records, Order, Record, SortOptions,
    };

    fn record(fields: &[&str]) -> Record {
        fields.iter().map(|field| field.to_string()).collect()
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut entries: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        entries
    }

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case("0", Ok(vec![0]))]
    #[case("2, 0", Ok(vec![2, 0]))]
    #[case("a", Err(()))]
    #[case("", Err(()))]
    fn test_parse_keys(#[case] keys: &str, #[case] expected: Result<Vec<usize>, ()>) {
        assert_eq!(parse_keys(keys).map_err(|_| ()), expected);
    }

    #[rstest]
    #[case(",", Ok(b','))]
    #[case(";", Ok(b';'))]
    #[case("\\t", Ok(b'\t'))]
    #[case("", Err(()))]
    #[case(",;", Err(()))]
    #[case("é", Err(()))]
    fn test_parse_delimiter(#[case] delimiter: &str, #[case] expected: Result<u8, ()>) {
        assert_eq!(parse_delimiter(delimiter).map_err(|_| ()), expected);
    }

    #[rstest]
    #[case("512", Ok(512))]
    #[case("4 KiB", Ok(4096))]
    #[case("many", Err(()))]
    fn test_parse_buf_size(#[case] buf_size: &str, #[case] expected: Result<usize, ()>) {
        assert_eq!(parse_buf_size(buf_size).map_err(|_| ()), expected);
    }

    #[rstest]
    #[case(&["b", "1"], &["a", "2"], &[0], Ordering::Greater)]
    #[case(&["b", "1"], &["a", "2"], &[1], Ordering::Less)]
    #[case(&["a", "1"], &["a", "2"], &[0], Ordering::Equal)]
    #[case(&["a", "1"], &["a", "2"], &[0, 1], Ordering::Less)]
    #[case(&["a"], &["a", ""], &[1], Ordering::Equal)]
    fn test_compare_keys(
        #[case] a: &[&str],
        #[case] b: &[&str],
        #[case] keys: &[usize],
        #[case] expected: Ordering,
    ) {
        assert_eq!(compare_keys(&record(a), &record(b), keys), expected);
    }

    #[rstest]
    // quoted field holding the delimiter
    #[case(
        "2,X2,\"Mitchell, Stewart and Bowen\",a.com\n1,X1,plain,b.com\n",
        vec![0], Order::Asc, false, b',',
        "1,X1,plain,b.com\n2,X2,\"Mitchell, Stewart and Bowen\",a.com\n",
    )]
    // sorting by a quoted column compares unquoted values
    #[case(
        "1,\"b, c\"\n2,a\n3,\"say \"\"hi\"\"\"\n",
        vec![1], Order::Asc, false, b',',
        "2,a\n1,\"b, c\"\n3,\"say \"\"hi\"\"\"\n",
    )]
    // embedded newline
    #[case(
        "b,\"line one\nline two\"\na,single\n",
        vec![0], Order::Asc, false, b',',
        "a,single\nb,\"line one\nline two\"\n",
    )]
    // missing key field compares as empty
    #[case(
        "x,2\ny\nz,1\n",
        vec![1], Order::Asc, false, b',',
        "y\nz,1\nx,2\n",
    )]
    #[case(
        "id,name\n2,b\n1,a\n",
        vec![0], Order::Asc, true, b',',
        "id,name\n1,a\n2,b\n",
    )]
    #[case(
        "id,name\n",
        vec![0], Order::Asc, true, b',',
        "id,name\n",
    )]
    #[case(
        "1,a\n3,c\n2,b\n",
        vec![0], Order::Desc, false, b',',
        "3,c\n2,b\n1,a\n",
    )]
    // equal keys keep their input order in both directions
    #[case(
        "k,1\nj,2\nk,3\nj,4\n",
        vec![0], Order::Desc, false, b',',
        "k,1\nk,3\nj,2\nj,4\n",
    )]
    #[case(
        "b;1,5\na;2\n",
        vec![0], Order::Asc, false, b';',
        "a;2\nb;1,5\n",
    )]
    fn test_sort_records(
        #[case] input: &str,
        #[case] keys: Vec<usize>,
        #[case] order: Order,
        #[case] header: bool,
        #[case] delimiter: u8,
        #[case] expected: &str,
    ) {
        let options = SortOptions {
            keys,
            order,
            header,
            delimiter,
            chunk_size: 2,
            ..SortOptions::default()
        };

        let mut output = Vec::new();
        sort_records(input.as_bytes(), &mut output, &options).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }

    #[rstest]
    fn test_run_replaces_output(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("input.csv");
        let output = tmp_dir.path().join("output.csv");
        fs::write(&input, "c,3\na,1\nb,2\n").unwrap();
        fs::write(&output, "previous result\n").unwrap();

        let options = SortOptions {
            chunk_size: 1,
            tmp_dir: Some(tmp_dir.path().to_path_buf()),
            ..SortOptions::default()
        };
        assert_eq!(run(Some(&input), Some(&output), &options).unwrap(), 3);

        assert_eq!(fs::read_to_string(&output).unwrap(), "a,1\nb,2\nc,3\n");
        assert_eq!(dir_entries(tmp_dir.path()), vec!["input.csv", "output.csv"]);
    }

    #[rstest]
    #[case(b"\xff\xfe,1\n".to_vec())]
    #[case(b"b,1\nc,2\n\xff\xfe,3\na,4\n".to_vec())]
    fn test_failed_sort_keeps_output(tmp_dir: tempfile::TempDir, #[case] input_data: Vec<u8>) {
        let input = tmp_dir.path().join("input.csv");
        let output = tmp_dir.path().join("output.csv");
        fs::write(&input, &input_data).unwrap();
        fs::write(&output, b"previous result\n").unwrap();

        let options = SortOptions {
            chunk_size: 1,
            tmp_dir: Some(tmp_dir.path().to_path_buf()),
            ..SortOptions::default()
        };
        assert!(run(Some(&input), Some(&output), &options).is_err());

        assert_eq!(fs::read(&output).unwrap(), b"previous result\n");
        // neither the partial result nor the run directory is left behind
        assert_eq!(dir_entries(tmp_dir.path()), vec!["input.csv", "output.csv"]);
    }

    #[rstest]
    fn test_missing_input_keeps_output(tmp_dir: tempfile::TempDir) {
        let input = tmp_dir.path().join("missing.csv");
        let output = tmp_dir.path().join("output.csv");
        fs::write(&output, b"previous result\n").unwrap();

        assert!(run(Some(&input), Some(&output), &SortOptions::default()).is_err());

        assert_eq!(fs::read(&output).unwrap(), b"previous result\n");
        assert_eq!(dir_entries(tmp_dir.path()), vec!["output.csv"]);
    }
}
