//! `Preloader`: copies upcoming queue tracks into a local cache ahead of
//! playback so the player never blocks on a slow/remote filesystem (spec
//! §4.8).
//!
//! Job lifecycle: `Initial -> Processing -> Preloaded | Failed -> CleanedUp`.
//! At most [`MAX_CONCURRENT_JOBS`] jobs run at once; only the first
//! [`PRELOAD_RANGE`] queue items are candidates. A cache entry is only
//! eligible for expiration once no [`PreloadedFile`] handle holds it, and
//! even then only after [`CACHE_EXPIRATION_DEBOUNCE`] of inactivity, to avoid
//! thrashing on rapid queue churn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::warn;

use crate::preloader::preloaded_file::{JobHandle, PreloadedFile};
use crate::queue::QueueId;
use crate::resolver;

pub const PRELOAD_RANGE: usize = 5;
pub const MAX_CONCURRENT_JOBS: usize = 2;
pub const CACHE_EXPIRATION_DEBOUNCE: Duration = Duration::from_millis(500);
pub const STARTUP_CLEANUP_MAX_AGE: Duration = Duration::from_secs(10 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadStatus {
    Initial,
    Processing,
    Preloaded(PathBuf),
    Failed,
    CleanedUp,
}

struct Job {
    status: PreloadStatus,
    handle: Arc<JobHandle>,
    idle_since: Option<Instant>,
}

pub struct Preloader {
    cache_dir: PathBuf,
    jobs: Mutex<HashMap<QueueId, Job>>,
    active_jobs: AtomicUsize,
}

impl Preloader {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            jobs: Mutex::new(HashMap::new()),
            active_jobs: AtomicUsize::new(0),
        }
    }

    /// Removes stale cache files left over from a prior, uncleanly-terminated
    /// run. Intended to run once at startup, on the worker pool.
    pub fn startup_cleanup(&self) {
        let _ = std::fs::create_dir_all(&self.cache_dir);
        resolver::delete_stale_files(&self.cache_dir, STARTUP_CLEANUP_MAX_AGE);
    }

    fn cache_path_for(&self, queue_id: QueueId, source: &Path) -> PathBuf {
        let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("bin");
        self.cache_dir
            .join(format!("P{}-Q{}.{}", std::process::id(), queue_id.0, ext))
    }

    pub fn status(&self, queue_id: QueueId) -> PreloadStatus {
        self.jobs
            .lock()
            .unwrap()
            .get(&queue_id)
            .map(|job| job.status.clone())
            .unwrap_or(PreloadStatus::Initial)
    }

    /// Candidate queue ids within [`PRELOAD_RANGE`] of the head that have a
    /// resolved source path and have not yet been claimed by a job.
    pub fn candidates(&self, head_items: &[(QueueId, Option<PathBuf>)]) -> Vec<(QueueId, PathBuf)> {
        let jobs = self.jobs.lock().unwrap();
        head_items
            .iter()
            .take(PRELOAD_RANGE)
            .filter_map(|(id, path)| {
                let path = path.as_ref()?;
                if jobs.contains_key(id) {
                    return None;
                }
                Some((*id, path.clone()))
            })
            .collect()
    }

    /// Claims a job slot and transitions it to `Processing`, if below
    /// [`MAX_CONCURRENT_JOBS`]. Returns `false` if no slot is available or a
    /// job already exists for this id.
    pub fn begin_job(&self, queue_id: QueueId) -> bool {
        if self.active_jobs.load(Ordering::Acquire) >= MAX_CONCURRENT_JOBS {
            return false;
        }
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&queue_id) {
            return false;
        }
        self.active_jobs.fetch_add(1, Ordering::AcqRel);
        jobs.insert(
            queue_id,
            Job {
                status: PreloadStatus::Processing,
                handle: Arc::new(JobHandle::new()),
                idle_since: None,
            },
        );
        true
    }

    /// Blocking copy from `source` into the cache directory via a temp file
    /// plus atomic rename, so a half-written file is never visible under its
    /// final name. Intended to run on the worker pool.
    pub fn run_copy(&self, queue_id: QueueId, source: &Path) -> std::io::Result<PathBuf> {
        let dest = self.cache_path_for(queue_id, source);
        let tmp = dest.with_extension(format!(
            "{}.tmp",
            dest.extension().and_then(|e| e.to_str()).unwrap_or("bin")
        ));
        std::fs::copy(source, &tmp)?;
        std::fs::rename(&tmp, &dest)?;
        Ok(dest)
    }

    /// Called once `run_copy` succeeds, from the control loop.
    pub fn complete_job(&self, queue_id: QueueId, path: PathBuf) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&queue_id) {
            job.status = PreloadStatus::Preloaded(path);
            job.idle_since = Some(Instant::now());
        }
        self.active_jobs.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn fail_job(&self, queue_id: QueueId, reason: &str) {
        warn!("preloader: job for queue id {} failed: {reason}", queue_id.0);
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&queue_id) {
            job.status = PreloadStatus::Failed;
            job.idle_since = Some(Instant::now());
        }
        self.active_jobs.fetch_sub(1, Ordering::AcqRel);
    }

    /// Takes out a lock on a `Preloaded` job's local file, if one exists.
    /// Holding the handle keeps the file from being expired.
    pub fn lock(&self, queue_id: QueueId) -> Option<PreloadedFile> {
        let jobs = self.jobs.lock().unwrap();
        let job = jobs.get(&queue_id)?;
        let PreloadStatus::Preloaded(path) = &job.status else {
            return None;
        };
        job.handle.lock_count.fetch_add(1, Ordering::AcqRel);
        Some(PreloadedFile {
            job: job.handle.clone(),
            path: path.clone(),
        })
    }

    /// Sweeps finished jobs no longer referenced by the queue's preload
    /// range (`still_wanted`), cleaning up any whose lock count is zero and
    /// whose idle time exceeds [`CACHE_EXPIRATION_DEBOUNCE`].
    pub fn expire_unwanted(&self, still_wanted: &[QueueId], now: Instant) {
        let mut jobs = self.jobs.lock().unwrap();
        let stale: Vec<QueueId> = jobs
            .iter()
            .filter(|(id, job)| {
                !still_wanted.contains(id)
                    && matches!(job.status, PreloadStatus::Preloaded(_) | PreloadStatus::Failed)
                    && job.handle.lock_count.load(Ordering::Acquire) == 0
                    && job
                        .idle_since
                        .map(|since| now.duration_since(since) >= CACHE_EXPIRATION_DEBOUNCE)
                        .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in stale {
            if let Some(job) = jobs.get_mut(&id) {
                if let PreloadStatus::Preloaded(path) = &job.status {
                    let _ = std::fs::remove_file(path);
                }
                job.status = PreloadStatus::CleanedUp;
            }
            jobs.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_cache_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("pmp_preloader_{}_{}_{}", name, std::process::id(), nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn begin_job_respects_the_concurrency_cap() {
        let preloader = Preloader::new(unique_cache_dir("cap"));
        assert!(preloader.begin_job(QueueId(1)));
        assert!(preloader.begin_job(QueueId(2)));
        assert!(!preloader.begin_job(QueueId(3)));
    }

    #[test]
    fn a_completed_job_frees_a_concurrency_slot() {
        let preloader = Preloader::new(unique_cache_dir("slot"));
        preloader.begin_job(QueueId(1));
        preloader.begin_job(QueueId(2));
        preloader.complete_job(QueueId(1), PathBuf::from("/tmp/whatever.mp3"));
        assert!(preloader.begin_job(QueueId(3)));
    }

    #[test]
    fn lock_is_only_available_once_preloaded() {
        let preloader = Preloader::new(unique_cache_dir("lock"));
        preloader.begin_job(QueueId(1));
        assert!(preloader.lock(QueueId(1)).is_none());

        let dir = unique_cache_dir("lock_file");
        let path = dir.join("cached.mp3");
        std::fs::write(&path, b"data").unwrap();
        preloader.complete_job(QueueId(1), path.clone());

        let handle = preloader.lock(QueueId(1)).unwrap();
        assert_eq!(handle.path(), path.as_path());
    }

    #[test]
    fn run_copy_moves_bytes_into_the_cache_dir_atomically() {
        let source_dir = unique_cache_dir("source");
        let source = source_dir.join("track.mp3");
        std::fs::write(&source, b"audio-bytes").unwrap();

        let preloader = Preloader::new(unique_cache_dir("dest"));
        let dest = preloader.run_copy(QueueId(7), &source).unwrap();
        assert!(dest.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"audio-bytes");
    }

    #[test]
    fn expire_unwanted_leaves_locked_files_alone() {
        let preloader = Preloader::new(unique_cache_dir("expire"));
        preloader.begin_job(QueueId(1));
        let dir = unique_cache_dir("expire_file");
        let path = dir.join("cached.mp3");
        std::fs::write(&path, b"data").unwrap();
        preloader.complete_job(QueueId(1), path.clone());

        let _handle = preloader.lock(QueueId(1)).unwrap();
        preloader.expire_unwanted(&[], Instant::now() + CACHE_EXPIRATION_DEBOUNCE * 2);
        assert!(path.exists());
        assert_eq!(preloader.status(QueueId(1)), PreloadStatus::Preloaded(path));
    }

    #[test]
    fn expire_unwanted_cleans_up_unlocked_idle_jobs() {
        let preloader = Preloader::new(unique_cache_dir("expire2"));
        preloader.begin_job(QueueId(1));
        let dir = unique_cache_dir("expire2_file");
        let path = dir.join("cached.mp3");
        std::fs::write(&path, b"data").unwrap();
        preloader.complete_job(QueueId(1), path.clone());

        preloader.expire_unwanted(&[], Instant::now() + CACHE_EXPIRATION_DEBOUNCE * 2);
        assert!(!path.exists());
        assert_eq!(preloader.status(QueueId(1)), PreloadStatus::Initial);
    }
}
