//! RAII handle returned by [`super::preloader::Preloader::lock`]: keeps a
//! preloaded file from being cleaned up while a client holds it (spec §4.8).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub(super) struct JobHandle {
    pub(super) lock_count: AtomicU32,
}

impl JobHandle {
    pub(super) fn new() -> Self {
        Self {
            lock_count: AtomicU32::new(0),
        }
    }
}

/// A live lock on a preloaded file's local path. Dropping it releases the
/// lock; the file is only eligible for cache expiration once its lock count
/// reaches zero.
pub struct PreloadedFile {
    pub(super) job: Arc<JobHandle>,
    pub(super) path: PathBuf,
}

impl PreloadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PreloadedFile {
    fn drop(&mut self) {
        self.job.lock_count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropping_a_handle_decrements_the_lock_count() {
        let job = Arc::new(JobHandle::new());
        job.lock_count.store(1, Ordering::SeqCst);
        let handle = PreloadedFile {
            job: job.clone(),
            path: PathBuf::from("/tmp/whatever.mp3"),
        };
        drop(handle);
        assert_eq!(job.lock_count.load(Ordering::SeqCst), 0);
    }
}
