//! Wire message payloads (spec §6.1). This surface is a summary contract,
//! frozen for client compatibility; the core module tree above only ever
//! sees the typed requests/notifications defined here, never raw bytes.

/// `C->S SingleByteAction` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleByteAction {
    Play,
    Pause,
    Skip,
    BreakAtFront,
    GetState,
    GetDynStatus,
    GetUuid,
    ListUsers,
    GetMode,
    GetIndexation,
    DynEnable,
    DynDisable,
    DynExpand,
    QueueTrim,
    PublicMode,
    PersonalMode,
    FullIndexation,
    Shutdown,
}

impl SingleByteAction {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Play,
            2 => Self::Pause,
            3 => Self::Skip,
            4 => Self::BreakAtFront,
            10 => Self::GetState,
            11 => Self::GetDynStatus,
            12 => Self::GetUuid,
            13 => Self::ListUsers,
            14 => Self::GetMode,
            15 => Self::GetIndexation,
            20 => Self::DynEnable,
            21 => Self::DynDisable,
            22 => Self::DynExpand,
            23 => Self::QueueTrim,
            30 => Self::PublicMode,
            31 => Self::PersonalMode,
            40 => Self::FullIndexation,
            99 => Self::Shutdown,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Play => 1,
            Self::Pause => 2,
            Self::Skip => 3,
            Self::BreakAtFront => 4,
            Self::GetState => 10,
            Self::GetDynStatus => 11,
            Self::GetUuid => 12,
            Self::ListUsers => 13,
            Self::GetMode => 14,
            Self::GetIndexation => 15,
            Self::DynEnable => 20,
            Self::DynDisable => 21,
            Self::DynExpand => 22,
            Self::QueueTrim => 23,
            Self::PublicMode => 30,
            Self::PersonalMode => 31,
            Self::FullIndexation => 40,
            Self::Shutdown => 99,
        }
    }
}

/// `set-volume = 100 + percent` is a range rather than a single code, so it
/// is split out from [`SingleByteAction`] at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    Single(SingleByteAction),
    SetVolume(u8),
}

impl ClientAction {
    pub fn from_code(code: u8) -> Option<Self> {
        if (100..=200).contains(&code) {
            return Some(Self::SetVolume(code - 100));
        }
        SingleByteAction::from_code(code).map(Self::Single)
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Single(action) => action.code(),
            Self::SetVolume(percent) => 100 + percent.min(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackInfoRequest {
    pub queue_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkTrackInfoRequest {
    pub queue_ids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFetchRequest {
    pub offset: u32,
    pub length: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntryRemovalRequest {
    pub queue_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntryMoveRequest {
    pub delta: i16,
    pub queue_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSeekRequest {
    pub queue_id: u32,
    pub position_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Action(ClientAction),
    TrackInfo(TrackInfoRequest),
    BulkTrackInfo(BulkTrackInfoRequest),
    QueueFetch(QueueFetchRequest),
    QueueEntryRemoval(QueueEntryRemovalRequest),
    QueueEntryMove(QueueEntryMoveRequest),
    PlayerSeek(PlayerSeekRequest),
}

/// Mirrors [`crate::player::PlayerState`] on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStateMessage {
    pub state: u8,
    pub volume: u8,
    pub queue_length: u32,
    pub now_playing_id: u32,
    pub position_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeChanged {
    pub volume: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicModeStatus {
    pub enabled: bool,
    pub no_repetition_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueContents {
    pub queue_length: u32,
    pub start_offset: u32,
    pub queue_ids: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntryEvent {
    Added { offset: u32, id: u32 },
    Removed { offset: u32, id: u32 },
    Moved { from: u32, to: u32, id: u32 },
}

pub mod track_info_status {
    pub const TRACK: u16 = 0;
    pub const BREAK: u16 = 1;
    pub const BARRIER: u16 = 2;
    pub const UNKNOWN_ID: u16 = 3;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub status: u16,
    pub queue_id: u32,
    pub length_seconds: i32,
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkTrackInfo {
    pub entries: Vec<TrackInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleResult {
    pub error_code: u16,
    pub client_reference: u32,
    pub int_data: u32,
    pub blob: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    PlayerState(PlayerStateMessage),
    VolumeChanged(VolumeChanged),
    DynamicModeStatus(DynamicModeStatus),
    QueueContents(QueueContents),
    QueueEntry(QueueEntryEvent),
    TrackInfo(TrackInfo),
    BulkTrackInfo(BulkTrackInfo),
    SimpleResult(SimpleResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_volume_code_round_trips_through_the_100_range() {
        let action = ClientAction::SetVolume(42);
        assert_eq!(action.code(), 142);
        assert_eq!(ClientAction::from_code(142), Some(action));
    }

    #[test]
    fn single_byte_action_round_trips() {
        for code in [1u8, 2, 3, 4, 10, 11, 12, 13, 14, 15, 20, 21, 22, 23, 30, 31, 40, 99] {
            let action = SingleByteAction::from_code(code).expect("known code");
            assert_eq!(action.code(), code);
        }
    }

    #[test]
    fn unknown_single_byte_code_is_rejected() {
        assert!(SingleByteAction::from_code(250).is_none());
        assert!(ClientAction::from_code(0).is_none());
    }
}
