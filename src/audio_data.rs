//! Audio metadata value types: format, length, and tags.

/// Known container/codec family. `Unknown` means the analyzer has not yet
/// (or could not) determine the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Unknown,
    Mp3,
    Flac,
}

/// `(format, trackLengthMs)`. A negative length means "unknown", matching
/// the original's signed-length convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioData {
    pub format: AudioFormat,
    pub track_length_ms: i64,
}

impl AudioData {
    pub fn unknown() -> Self {
        Self {
            format: AudioFormat::Unknown,
            track_length_ms: -1,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.format != AudioFormat::Unknown && self.track_length_ms >= 0
    }

    pub fn length_known(&self) -> bool {
        self.track_length_ms >= 0
    }
}

impl Default for AudioData {
    fn default() -> Self {
        Self::unknown()
    }
}

/// `(title, artist, album, albumArtist)`, each optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagData {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
}

impl TagData {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.album_artist.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_never_complete() {
        let data = AudioData::unknown();
        assert!(!data.is_complete());
    }

    #[test]
    fn known_format_with_nonnegative_length_is_complete() {
        let data = AudioData {
            format: AudioFormat::Flac,
            track_length_ms: 180_000,
        };
        assert!(data.is_complete());
    }

    #[test]
    fn known_format_with_negative_length_is_not_complete() {
        let data = AudioData {
            format: AudioFormat::Mp3,
            track_length_ms: -1,
        };
        assert!(!data.is_complete());
    }

    #[test]
    fn empty_tag_data_detects_all_none() {
        assert!(TagData::default().is_empty());
        let tags = TagData {
            title: Some("Song".to_string()),
            ..Default::default()
        };
        assert!(!tags.is_empty());
    }
}
