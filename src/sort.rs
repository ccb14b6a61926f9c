//! External sorter.

use log;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crate::buffer::ChunkBuffer;
use crate::merger::ScanMerger;
use crate::reader::{CancelSignal, RunReadError, RunReader};
use crate::run::{ExternalRun, ExternalRunError, RmpExternalRun, RunId};
use crate::sink::RecordSink;
use crate::store::RunStore;

/// Default number of items sorted in memory at once.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Sorting error.
#[derive(Debug)]
pub enum SortError<S: Error, D: Error, I: Error> {
    /// Chunk size is zero.
    InvalidChunkSize,
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Common I/O error.
    IO(io::Error),
    /// Data serialization error.
    SerializationError(S),
    /// Data deserialization error.
    DeserializationError(D),
    /// Run reader terminated without finishing its run.
    ReaderDisconnected(RunId),
    /// Input data stream error
    InputError(I),
    /// Output data stream error
    OutputError(io::Error),
}

impl<S, D, I> Error for SortError<S, D, I>
where
    S: Error + 'static,
    D: Error + 'static,
    I: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InvalidChunkSize => None,
            SortError::TempDir(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::SerializationError(err) => Some(err),
            SortError::DeserializationError(err) => Some(err),
            SortError::ReaderDisconnected(_) => None,
            SortError::InputError(err) => Some(err),
            SortError::OutputError(err) => Some(err),
        }
    }
}

impl<S: Error, D: Error, I: Error> Display for SortError<S, D, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidChunkSize => write!(f, "chunk size must be at least 1"),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::SerializationError(err) => write!(f, "data serialization error: {}", err),
            SortError::DeserializationError(err) => write!(f, "data deserialization error: {}", err),
            SortError::ReaderDisconnected(run) => write!(f, "run {} reader terminated unexpectedly", run),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::OutputError(err) => write!(f, "output data stream error: {}", err),
        }
    }
}

impl<S: Error, D: Error, I: Error> From<RunReadError<D>> for SortError<S, D, I> {
    fn from(err: RunReadError<D>) -> Self {
        match err {
            RunReadError::Read(run, err) => {
                log::debug!("run {} read failed", run);
                SortError::DeserializationError(err)
            }
            RunReadError::Disconnected(run) => SortError::ReaderDisconnected(run),
        }
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<T, E, C = RmpExternalRun<T>>
where
    E: Error,
    C: ExternalRun<T>,
{
    /// Maximum number of items sorted in memory at once.
    chunk_size: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// External run type.
    external_run_type: PhantomData<C>,
    /// Input item type.
    item_type: PhantomData<T>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<T, E, C> ExternalSorterBuilder<T, E, C>
where
    E: Error,
    C: ExternalRun<T>,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(
        self,
    ) -> Result<ExternalSorter<T, E, C>, SortError<C::SerializationError, C::DeserializationError, E>> {
        ExternalSorter::new(self.chunk_size, self.tmp_dir.as_deref(), self.rw_buf_size)
    }

    /// Sets maximum number of items sorted in memory at once.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> ExternalSorterBuilder<T, E, C> {
        self.chunk_size = chunk_size;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<T, E, C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<T, E, C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl<T, E, C> Default for ExternalSorterBuilder<T, E, C>
where
    E: Error,
    C: ExternalRun<T>,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            chunk_size: DEFAULT_CHUNK_SIZE,
            tmp_dir: None,
            rw_buf_size: None,
            external_run_type: PhantomData,
            item_type: PhantomData,
            input_error_type: PhantomData,
        }
    }
}

/// External sorter.
///
/// Sorting is done in two phases. During the first phase input items are read in chunks of a limited size,
/// every chunk is sorted in memory and saved to a temporary file as a run. During the second phase every run is
/// streamed by a dedicated reader thread and the runs are merged into a single sorted stream.
pub struct ExternalSorter<T, E, C = RmpExternalRun<T>>
where
    E: Error,
    C: ExternalRun<T>,
{
    /// Maximum number of items sorted in memory at once.
    chunk_size: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// External run type.
    external_run_type: PhantomData<C>,
    /// Input item type.
    item_type: PhantomData<T>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<T, E, C> ExternalSorter<T, E, C>
where
    E: Error,
    C: ExternalRun<T>,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `chunk_size` - Maximum number of items sorted in memory at once. Must be at least 1.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Run files read/write buffer size.
    pub fn new(
        chunk_size: usize,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError<C::SerializationError, C::DeserializationError, E>> {
        if chunk_size == 0 {
            return Err(SortError::InvalidChunkSize);
        }

        return Ok(ExternalSorter {
            chunk_size,
            tmp_dir: tmp_path.map(Into::into),
            rw_buf_size,
            external_run_type: PhantomData,
            item_type: PhantomData,
            input_error_type: PhantomData,
        });
    }

    /// Returns maximum number of items sorted in memory at once.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl<T, E, C> ExternalSorter<T, E, C>
where
    T: Send + 'static,
    E: Error,
    C: ExternalRun<T> + Send + 'static,
{
    /// Sorts data from the input.
    /// Returns an iterator that can be used to get sorted data stream.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    pub fn sort<I>(
        &self,
        input: I,
    ) -> Result<
        SortedStream<T, C, impl Fn(&T, &T) -> Ordering>,
        SortError<C::SerializationError, C::DeserializationError, E>,
    >
    where
        T: Ord,
        I: IntoIterator<Item = Result<T, E>>,
    {
        self.sort_by(input, T::cmp)
    }

    /// Sorts data from the input using a key extraction function.
    /// Returns an iterator that can be used to get sorted data stream.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `key` - Function to be used to extract the sorting key of an item
    pub fn sort_by_key<I, K, G>(
        &self,
        input: I,
        key: G,
    ) -> Result<
        SortedStream<T, C, impl Fn(&T, &T) -> Ordering>,
        SortError<C::SerializationError, C::DeserializationError, E>,
    >
    where
        I: IntoIterator<Item = Result<T, E>>,
        K: Ord,
        G: Fn(&T) -> K,
    {
        self.sort_by(input, move |a: &T, b: &T| key(a).cmp(&key(b)))
    }

    /// Sorts data from the input using a custom compare function.
    /// Returns an iterator that can be used to get sorted data stream.
    ///
    /// Items the compare function deems equal keep their input order.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `compare` - Function be be used to compare items
    pub fn sort_by<I, F>(
        &self,
        input: I,
        compare: F,
    ) -> Result<SortedStream<T, C, F>, SortError<C::SerializationError, C::DeserializationError, E>>
    where
        I: IntoIterator<Item = Result<T, E>>,
        F: Fn(&T, &T) -> Ordering,
    {
        let mut store = RunStore::new(self.tmp_dir.as_deref(), self.rw_buf_size).map_err(SortError::TempDir)?;
        let mut chunk_buf = ChunkBuffer::new(self.chunk_size);

        for item in input.into_iter() {
            match item {
                Ok(item) => chunk_buf.push(item),
                Err(err) => return Err(SortError::InputError(err)),
            }

            if chunk_buf.is_full() {
                self.create_run(&mut store, chunk_buf, &compare)?;
                chunk_buf = ChunkBuffer::new(self.chunk_size);
            }
        }

        if !chunk_buf.is_empty() {
            self.create_run(&mut store, chunk_buf, &compare)?;
        }

        log::debug!("external sort preparation done ({} runs)", store.len());

        return SortedStream::open(store, compare);
    }

    /// Sorts data from the input and writes the result to the sink.
    /// Returns the number of items written.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `sink` - Sink the sorted data is written to
    pub fn sort_into<I, K>(
        &self,
        input: I,
        sink: K,
    ) -> Result<u64, SortError<C::SerializationError, C::DeserializationError, E>>
    where
        T: Ord,
        I: IntoIterator<Item = Result<T, E>>,
        K: RecordSink<T>,
    {
        self.sort_by_into(input, sink, T::cmp)
    }

    /// Sorts data from the input using a custom compare function and writes the result to the sink.
    /// Returns the number of items written.
    ///
    /// Nothing is written to the sink past the first error and [`RecordSink::finish`] is called
    /// only if every item has been written.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `sink` - Sink the sorted data is written to
    /// * `compare` - Function be be used to compare items
    pub fn sort_by_into<I, K, F>(
        &self,
        input: I,
        mut sink: K,
        compare: F,
    ) -> Result<u64, SortError<C::SerializationError, C::DeserializationError, E>>
    where
        I: IntoIterator<Item = Result<T, E>>,
        K: RecordSink<T>,
        F: Fn(&T, &T) -> Ordering,
    {
        let sorted = self.sort_by(input, compare)?;

        let mut count: u64 = 0;
        for item in sorted {
            sink.emit(item?).map_err(SortError::OutputError)?;
            count += 1;
        }
        sink.finish().map_err(SortError::OutputError)?;

        log::info!("{} items sorted", count);

        return Ok(count);
    }

    fn create_run<F>(
        &self,
        store: &mut RunStore,
        mut buffer: ChunkBuffer<T>,
        compare: &F,
    ) -> Result<RunId, SortError<C::SerializationError, C::DeserializationError, E>>
    where
        F: Fn(&T, &T) -> Ordering,
    {
        log::debug!("sorting chunk data ({} items) ...", buffer.len());
        buffer.sort_by(compare);

        log::debug!("saving chunk data");
        let run = store.write::<T, C>(buffer).map_err(|err| match err {
            ExternalRunError::IO(err) => SortError::IO(err),
            ExternalRunError::SerializationError(err) => SortError::SerializationError(err),
        })?;

        return Ok(run);
    }
}

/// Sorted data stream. Merges runs produced by [`ExternalSorter`] yielding items in ascending order.
///
/// Dropping the stream at any point cancels run readers, waits for them to finish
/// and deletes the runs.
pub struct SortedStream<T, C, F>
where
    C: ExternalRun<T>,
    F: Fn(&T, &T) -> Ordering,
{
    // fields are dropped in declaration order: readers are joined before their runs are deleted
    cancel: Option<CancelSignal>,
    merger: ScanMerger<T, RunReadError<C::DeserializationError>, F, RunReader<T, C::DeserializationError>>,
    store: RunStore,
}

impl<T, C, F> SortedStream<T, C, F>
where
    T: Send + 'static,
    C: ExternalRun<T> + Send + 'static,
    F: Fn(&T, &T) -> Ordering,
{
    fn open<E: Error>(
        store: RunStore,
        compare: F,
    ) -> Result<Self, SortError<C::SerializationError, C::DeserializationError, E>> {
        let cancel = CancelSignal::new();
        let mut readers = Vec::with_capacity(store.len());

        for &run in store.runs() {
            let items = store.open::<T, C>(run).map_err(SortError::IO)?;
            readers.push(RunReader::spawn(run, items, &cancel).map_err(SortError::IO)?);
        }

        log::debug!("merging {} runs", readers.len());

        return Ok(SortedStream {
            cancel: Some(cancel),
            merger: ScanMerger::new(readers, compare),
            store,
        });
    }
}

impl<T, C, F> SortedStream<T, C, F>
where
    C: ExternalRun<T>,
    F: Fn(&T, &T) -> Ordering,
{
    /// Returns the number of runs being merged.
    pub fn runs(&self) -> usize {
        self.merger.len()
    }

    /// Returns the directory holding the runs.
    pub fn tmp_dir(&self) -> &Path {
        self.store.path()
    }
}

impl<T, C, F> Iterator for SortedStream<T, C, F>
where
    C: ExternalRun<T>,
    F: Fn(&T, &T) -> Ordering,
{
    type Item = Result<T, RunReadError<C::DeserializationError>>;

    /// Returns the next item in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        self.merger.next()
    }
}

impl<T, C, F> Drop for SortedStream<T, C, F>
where
    C: ExternalRun<T>,
    F: Fn(&T, &T) -> Ordering,
{
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl<T, C, F> Debug for SortedStream<T, C, F>
where
    C: ExternalRun<T>,
    F: Fn(&T, &T) -> Ordering,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedStream")
            .field("runs", &self.runs())
            .field("tmp_dir", &self.tmp_dir())
            .finish()
    }
}
