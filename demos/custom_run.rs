use std::fs;
use std::io::{self, prelude::*};

use env_logger;
use log;

use spillsort::{ExternalRun, ExternalSorter, ExternalSorterBuilder};

/// Run format storing numbers as fixed-width little-endian words.
struct WordRun {
    reader: io::Take<io::BufReader<fs::File>>,
}

impl ExternalRun<u32> for WordRun {
    type SerializationError = io::Error;
    type DeserializationError = io::Error;

    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self {
        WordRun { reader }
    }

    fn dump(
        run_writer: &mut io::BufWriter<fs::File>,
        items: impl IntoIterator<Item = u32>,
    ) -> Result<(), Self::SerializationError> {
        for item in items {
            run_writer.write_all(&item.to_le_bytes())?;
        }

        return Ok(());
    }
}

impl Iterator for WordRun {
    type Item = Result<u32, io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.limit() == 0 {
            return None;
        }

        let mut buf = [0u8; 4];
        Some(self.reader.read_exact(&mut buf).map(|_| u32::from_le_bytes(buf)))
    }
}

/// Sorts pseudo-random numbers spilled in fixed-width runs.
///
/// cargo run --example custom_run --features env_logger
fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let sorter: ExternalSorter<u32, io::Error, WordRun> = ExternalSorterBuilder::new()
        .with_chunk_size(10_000)
        .build()
        .unwrap();

    // xorshift keeps the demo free of extra dependencies
    let mut state: u32 = 2463534242;
    let numbers = (0..100_000).map(move |_| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        Ok(state)
    });

    let mut sorted = Vec::new();
    let count = sorter.sort_into(numbers, &mut sorted).unwrap();

    assert!(sorted.windows(2).all(|pair| pair[0] <= pair[1]));
    println!("{} numbers sorted, smallest {:?}, largest {:?}", count, sorted.first(), sorted.last());
}
