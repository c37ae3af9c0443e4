//! Local-cache preloading ahead of playback (spec §4.8).

pub mod preloaded_file;
pub mod preloader;

pub use preloaded_file::PreloadedFile;
pub use preloader::{PreloadStatus, Preloader, CACHE_EXPIRATION_DEBOUNCE, MAX_CONCURRENT_JOBS, PRELOAD_RANGE};
