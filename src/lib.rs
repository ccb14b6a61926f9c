//! `spillsort` is an external merge sort implementation.
//!
//! External sorting handles data sets that do not fit into the main memory. Sorting is achieved in two passes.
//! During the first pass the input is split into chunks of a bounded size, every chunk is sorted in memory and
//! spilled to temporary storage as a sorted run. During the second pass every run is streamed back by its own
//! reader thread and the runs are merged into a single sorted output.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   at most one chunk is held in memory while runs are being built, and at most one item per run
//!   while they are being merged.
//! * **Data agnostic:**
//!   any type implementing `serde` serialization/deserialization is supported by default,
//!   otherwise you can implement your own [`ExternalRun`] format.
//! * **Deterministic:**
//!   items the comparator deems equal keep their input order.
//! * **Fail fast:**
//!   the first input, storage or output error aborts the sort, run readers are cancelled and
//!   temporary runs are deleted.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io::{self, prelude::*};
//! use std::path;
//!
//! use spillsort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
//!     let mut output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());
//!
//!     let sorter: ExternalSorter<String, io::Error> = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_chunk_size(1_000_000)
//!         .build()
//!         .unwrap();
//!
//!     let sorted = sorter.sort(input_reader.lines()).unwrap();
//!
//!     for item in sorted.map(Result::unwrap) {
//!         output_writer.write_all(format!("{}\n", item).as_bytes()).unwrap();
//!     }
//!     output_writer.flush().unwrap();
//! }
//! ```

pub mod buffer;
pub mod merger;
pub mod reader;
pub mod run;
pub mod sink;
pub mod sort;
pub mod store;

pub use buffer::ChunkBuffer;
pub use merger::ScanMerger;
pub use reader::{CancelSignal, RunReadError, RunReader};
pub use run::{ExternalRun, ExternalRunError, RmpExternalRun, RunId};
pub use sink::RecordSink;
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortedStream};
pub use store::RunStore;
