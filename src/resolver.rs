//! `findPathForHash(Async)` and the library scan that feeds
//! [`RandomTracksSource`](crate::random_tracks_source::RandomTracksSource)
//! with newly discovered hashes.
//!
//! Grounded on the teacher's `media_file_discovery.rs` (recursive directory
//! walk, supported-extension gate) and `metadata/metadata_tags.rs` (lofty tag
//! reads), adapted to a hash-keyed lookup per spec §6.2/§6.3.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};

use lofty::file::TaggedFileExt;
use lofty::prelude::Accessor;
use lofty::probe::Probe;

use crate::audio_data::{AudioData, AudioFormat, TagData};
use crate::hash::{FileHash, HashId};

pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "flac", "ogg", "wav"];

pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Recursively collects supported audio files under `root`. Symlinks are not
/// followed, matching spec §6.3. Manual directory-stack walk, same shape as
/// the teacher's `collect_audio_files_from_folder`.
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() && is_supported_audio_file(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// A resolved file's analyzed identity: hash, audio properties, and tags.
#[derive(Debug, Clone)]
pub struct AnalyzedFile {
    pub path: PathBuf,
    pub hash: FileHash,
    pub audio_data: AudioData,
    pub tags: TagData,
}

fn probe_track_length_ms(path: &Path) -> Option<i64> {
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::probe::Hint;

    let file = std::fs::File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &Default::default(),
            &symphonia::core::meta::MetadataOptions::default(),
        )
        .ok()?;
    let track = probed.format.default_track()?;
    let params = &track.codec_params;
    let frames = params.n_frames?;
    let rate = params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some((frames as f64 / rate as f64 * 1000.0) as i64)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Reads title/artist/album/album-artist tags via `lofty`. Missing or
/// unparsable tags fall back to `None` per field rather than failing the
/// whole analysis.
fn read_tag_data(path: &Path) -> TagData {
    let tagged_file = match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(file) => file,
        Err(err) => {
            debug!("resolver: tag read failed for {}: {}", path.display(), err);
            return TagData::default();
        }
    };
    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return TagData::default();
    };
    TagData {
        title: non_empty(tag.title().map(|v| v.to_string())),
        artist: non_empty(tag.artist().map(|v| v.to_string())),
        album: non_empty(tag.album().map(|v| v.to_string())),
        album_artist: non_empty(tag.get_string(&lofty::tag::ItemKey::AlbumArtist).map(|v| v.to_string())),
    }
}

fn format_from_extension(path: &Path) -> AudioFormat {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ref ext) if ext == "mp3" => AudioFormat::Mp3,
        Some(ref ext) if ext == "flac" => AudioFormat::Flac,
        _ => AudioFormat::Unknown,
    }
}

/// Analyzes one file: computes its content hash and probes length/format.
/// Intended to run on the worker pool (spec §5); this function itself is
/// blocking I/O and must not be called from the control loop.
pub fn analyze_file(path: &Path) -> std::io::Result<AnalyzedFile> {
    let bytes = std::fs::read(path)?;
    let hash = FileHash::from_bytes(&bytes);
    let format = format_from_extension(path);
    let track_length_ms = probe_track_length_ms(path).unwrap_or(-1);
    let audio_data = AudioData {
        format,
        track_length_ms,
    };
    Ok(AnalyzedFile {
        path: path.to_path_buf(),
        hash,
        audio_data,
        tags: read_tag_data(path),
    })
}

/// Maps `HashId -> candidate playable paths`, populated by the library scan
/// and consulted by the queue's front-maintenance sweep and the preloader.
/// Synchronous, in-process: this is the "lock-free read path" side of
/// resolution; actual filesystem re-validation happens on the worker pool
/// and feeds back via [`PathCache::insert`].
#[derive(Default)]
pub struct PathCache {
    paths: Mutex<HashMap<HashId, Vec<PathBuf>>>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash_id: HashId, path: PathBuf) {
        self.paths.lock().unwrap().entry(hash_id).or_default().push(path);
    }

    pub fn paths_for(&self, hash_id: HashId) -> Vec<PathBuf> {
        self.paths.lock().unwrap().get(&hash_id).cloned().unwrap_or_default()
    }

    pub fn has_path(&self, hash_id: HashId) -> bool {
        self.paths
            .lock()
            .unwrap()
            .get(&hash_id)
            .map(|paths| !paths.is_empty())
            .unwrap_or(false)
    }

    /// Synchronous `findPathForHash`: first candidate path still present on
    /// disk, or `None`. The async variant (spec "findPathForHashAsync") is a
    /// worker-pool wrapper that calls this after a rescan; see
    /// [`find_path_for_hash_async`].
    pub fn find_path_for_hash(&self, hash_id: HashId) -> Option<PathBuf> {
        self.paths_for(hash_id).into_iter().find(|p| p.is_file())
    }
}

/// Worker-pool wrapper around [`PathCache::find_path_for_hash`], matching
/// spec §5's "runs on a worker, result delivered to the control loop".
pub async fn find_path_for_hash_async(cache: std::sync::Arc<PathCache>, hash_id: HashId) -> Option<PathBuf> {
    tokio::task::spawn_blocking(move || cache.find_path_for_hash(hash_id))
        .await
        .unwrap_or(None)
}

/// Scans `roots` for supported audio files and analyzes each one. Intended
/// to run on the worker pool; the caller is responsible for registering the
/// results with the live [`HashIdRegistry`] and [`PathCache`] under its own
/// lock, since minting a `HashId` from a throwaway registry here would not
/// match the ids the rest of the core later allocates for the same hash
/// (spec §6.3, SPEC_FULL §E.5 "full indexation").
pub fn scan_library(roots: &[PathBuf]) -> Vec<AnalyzedFile> {
    let mut discovered = Vec::new();
    for root in roots {
        for path in collect_audio_files(root) {
            match analyze_file(&path) {
                Ok(analyzed) => discovered.push(analyzed),
                Err(err) => {
                    warn!("resolver: failed to analyze {}: {}", path.display(), err);
                }
            }
        }
    }
    debug!("resolver: scan discovered {} files", discovered.len());
    discovered
}

/// Deletes preload-cache files older than `max_age` under `dir`. Used by the
/// preloader's startup sweep (spec §4.8).
pub fn delete_stale_files(dir: &Path, max_age: Duration) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    let now = std::time::SystemTime::now();
    for entry in read_dir.flatten() {
        let path = entry.path();
        if !is_supported_audio_file(&path) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if now.duration_since(modified).unwrap_or_default() > max_age {
            let _ = std::fs::remove_file(&path);
        }
    }
}
