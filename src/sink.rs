//! Sorted output sinks.

use std::io;

/// Record sink interface. Accepts sorted items one at a time in the order they are presented.
pub trait RecordSink<T> {
    /// Persists or emits a single item.
    fn emit(&mut self, item: T) -> io::Result<()>;

    /// Finalizes the output after the last item. The output is valid only after a successful call.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T> RecordSink<T> for Vec<T> {
    fn emit(&mut self, item: T) -> io::Result<()> {
        self.push(item);
        Ok(())
    }
}

impl<T, S: RecordSink<T> + ?Sized> RecordSink<T> for &mut S {
    fn emit(&mut self, item: T) -> io::Result<()> {
        (**self).emit(item)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}
