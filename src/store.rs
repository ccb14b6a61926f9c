//! Temporary run storage.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::run::{ExternalRun, ExternalRunError, RunId};

/// Run store. Persists sorted runs as numbered files inside a private temporary directory
/// and deletes them once they are no longer needed.
///
/// Every run is owned by a single writer while it is being created and by a single reader
/// during the merge, so the store requires no locking.
pub struct RunStore {
    /// Private directory holding run files.
    dir: tempfile::TempDir,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Identifiers of runs written and not deleted yet.
    runs: Vec<RunId>,
    /// Next unused run identifier.
    next_id: RunId,
}

impl RunStore {
    /// Creates a new run store.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory the store directory is created in. If the parameter is [`None`] default OS
    ///   temporary directory will be used.
    /// * `rw_buf_size` - Run file read/write buffer size.
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> io::Result<Self> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("spillsort-");
            builder
        };
        let dir = match tmp_path {
            Some(tmp_path) => builder.tempdir_in(tmp_path),
            None => builder.tempdir(),
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(RunStore {
            dir,
            rw_buf_size,
            runs: Vec::new(),
            next_id: 0,
        });
    }

    /// Returns the store directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the file path of a run.
    pub fn run_path(&self, id: RunId) -> PathBuf {
        self.dir.path().join(format!("run-{}.bin", id))
    }

    /// Returns identifiers of all live runs in ascending order.
    pub fn runs(&self) -> &[RunId] {
        &self.runs
    }

    /// Returns the number of live runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Persists sorted items as a new run. The run file is flushed before the identifier is returned.
    pub fn write<T, C>(
        &mut self,
        items: impl IntoIterator<Item = T>,
    ) -> Result<RunId, ExternalRunError<C::SerializationError>>
    where
        C: ExternalRun<T>,
    {
        let id = self.next_id;
        let path = self.run_path(id);
        let file = fs::File::create(&path).map_err(ExternalRunError::IO)?;
        // tracked from file creation on, partially written runs are cleaned up too
        self.next_id += 1;
        self.runs.push(id);

        let mut run_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        C::dump(&mut run_writer, items).map_err(ExternalRunError::SerializationError)?;
        run_writer.flush().map_err(ExternalRunError::IO)?;

        log::debug!("run {} saved to {}", id, path.display());

        return Ok(id);
    }

    /// Opens a sequential reader over a previously written run.
    pub fn open<T, C>(&self, id: RunId) -> io::Result<C>
    where
        C: ExternalRun<T>,
    {
        let file = fs::File::open(self.run_path(id))?;
        let file_len = file.metadata()?.len();

        let run_reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(C::new(run_reader.take(file_len)));
    }

    /// Deletes a run file. Failures are logged but never propagated.
    /// Returns `false` if the run file couldn't be removed.
    pub fn delete(&mut self, id: RunId) -> bool {
        self.runs.retain(|&run| run != id);
        match fs::remove_file(self.run_path(id)) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("run {} deletion failed: {}", id, err);
                false
            }
        }
    }

    /// Deletes all live runs. Every deletion is attempted regardless of preceding failures.
    /// Returns the number of runs that couldn't be deleted.
    pub fn cleanup(&mut self) -> usize {
        let runs = std::mem::take(&mut self.runs);
        runs.into_iter().filter(|&id| !self.delete(id)).count()
    }
}

impl Drop for RunStore {
    fn drop(&mut self) {
        let failures = self.cleanup();
        if failures > 0 {
            log::warn!("{} run(s) left in {}", failures, self.dir.path().display());
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::RunStore;
    use crate::run::RmpExternalRun;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(None)]
    #[case(Some(16))]
    fn test_write_and_open(tmp_dir: tempfile::TempDir, #[case] rw_buf_size: Option<usize>) {
        let mut store = RunStore::new(Some(tmp_dir.path()), rw_buf_size).unwrap();

        let first = store.write::<_, RmpExternalRun<i32>>(vec![1, 3, 5]).unwrap();
        let second = store.write::<_, RmpExternalRun<i32>>(vec![2, 4]).unwrap();
        assert_eq!((first, second), (0, 1));
        assert_eq!(store.runs(), &[0, 1]);

        let run = store.open::<i32, RmpExternalRun<i32>>(second).unwrap();
        let restored: Result<Vec<i32>, _> = run.collect();
        assert_eq!(restored.unwrap(), vec![2, 4]);
    }

    #[rstest]
    fn test_open_missing_run(tmp_dir: tempfile::TempDir) {
        let store = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        assert!(store.open::<i32, RmpExternalRun<i32>>(7).is_err());
    }

    #[rstest]
    fn test_delete(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        let id = store.write::<_, RmpExternalRun<i32>>(vec![1]).unwrap();

        assert!(store.delete(id));
        assert!(!store.run_path(id).exists());
        assert!(store.is_empty());
        // a second deletion fails quietly
        assert!(!store.delete(id));
    }

    #[rstest]
    fn test_cleanup_continues_after_failure(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        for i in 0..5 {
            store.write::<_, RmpExternalRun<i32>>(vec![i]).unwrap();
        }

        // deleting run 2 behind the store's back makes its removal fail
        fs::remove_file(store.run_path(2)).unwrap();

        assert_eq!(store.cleanup(), 1);
        for id in 0..5 {
            assert!(!store.run_path(id).exists(), "run {} left behind", id);
        }
        assert!(store.is_empty());
        assert_eq!(store.cleanup(), 0);
    }

    #[rstest]
    fn test_drop_removes_directory(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(tmp_dir.path()), None).unwrap();
        store.write::<_, RmpExternalRun<i32>>(vec![1, 2]).unwrap();
        let path = store.path().to_path_buf();

        drop(store);

        assert!(!path.exists());
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }
}
