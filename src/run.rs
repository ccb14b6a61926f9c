//! Run serialization format.

use std::error::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io;
use std::marker::PhantomData;

/// Run identifier. Runs are numbered sequentially starting from 0 in the order they are written.
pub type RunId = usize;

/// External run interface. Defines how a sorted run is dumped to a file and read back from it.
///
/// Round-tripping a sequence of items through [`ExternalRun::dump`] and the iterator must be lossless
/// and order-preserving.
pub trait ExternalRun<T>: Sized + Iterator<Item = Result<T, Self::DeserializationError>> {
    /// Error returned when an item can't be written.
    type SerializationError: Error + Send + 'static;
    /// Error returned when an item can't be read back.
    type DeserializationError: Error + Send + 'static;

    /// Creates an instance of an external run reading items from the reader.
    /// The reader is limited to the run file length.
    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self;

    /// Dumps items to an external file.
    fn dump(
        run_writer: &mut io::BufWriter<fs::File>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<(), Self::SerializationError>;
}

/// Run writing error.
#[derive(Debug)]
pub enum ExternalRunError<S: Error> {
    /// Run file creation or flushing error.
    IO(io::Error),
    /// Data serialization error.
    SerializationError(S),
}

impl<S: Error + 'static> Error for ExternalRunError<S> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            ExternalRunError::IO(err) => err,
            ExternalRunError::SerializationError(err) => err,
        })
    }
}

impl<S: Error> Display for ExternalRunError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ExternalRunError::IO(err) => write!(f, "run file I/O failed: {}", err),
            ExternalRunError::SerializationError(err) => write!(f, "run serialization error: {}", err),
        }
    }
}

/// RMP (Rust MessagePack) external run implementation.
/// It uses MessagePack as a data serialization format.
/// For more information see https://msgpack.org/.
pub struct RmpExternalRun<T> {
    reader: io::Take<io::BufReader<fs::File>>,

    item_type: PhantomData<T>,
}

impl<T> ExternalRun<T> for RmpExternalRun<T>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    type SerializationError = rmp_serde::encode::Error;
    type DeserializationError = rmp_serde::decode::Error;

    fn new(reader: io::Take<io::BufReader<fs::File>>) -> Self {
        RmpExternalRun {
            reader,
            item_type: PhantomData,
        }
    }

    fn dump(
        mut run_writer: &mut io::BufWriter<fs::File>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<(), Self::SerializationError> {
        for item in items.into_iter() {
            rmp_serde::encode::write(&mut run_writer, &item)?;
        }

        return Ok(());
    }
}

impl<T> Iterator for RmpExternalRun<T>
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    type Item = Result<T, rmp_serde::decode::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.limit() == 0 {
            None
        } else {
            Some(rmp_serde::decode::from_read(&mut self.reader))
        }
    }
}
