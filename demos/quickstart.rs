use std::error::Error;
use std::io::{self, prelude::*};

use env_logger;
use log;

use spillsort::{ExternalSorter, ExternalSorterBuilder};

/// Sorts stdin lines by length, then alphabetically, and prints them to stdout.
///
/// cargo run --example quickstart --features env_logger < input.txt > output.txt
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let sorter: ExternalSorter<String, io::Error> = ExternalSorterBuilder::new()
        .with_tmp_dir(std::env::temp_dir().as_path())
        .with_chunk_size(100_000)
        .build()?;

    let stdin = io::stdin();
    let sorted = sorter.sort_by(stdin.lock().lines(), |a: &String, b: &String| {
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    })?;

    let stdout = io::stdout();
    let mut output_writer = io::BufWriter::new(stdout.lock());
    for line in sorted {
        writeln!(output_writer, "{}", line?)?;
    }
    output_writer.flush()?;

    return Ok(());
}
