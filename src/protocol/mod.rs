//! The wire protocol: dual-mode (line-text bootstrap, then length-prefixed
//! binary) TCP framing and message payloads (spec §6.1). Out of core scope
//! functionally, but its shapes are frozen for client compatibility.

pub mod codec;
pub mod messages;

pub use messages::{
    BulkTrackInfo, BulkTrackInfoRequest, ClientAction, ClientMessage, DynamicModeStatus, PlayerSeekRequest,
    PlayerStateMessage, QueueContents, QueueEntryEvent, QueueEntryMoveRequest, QueueEntryRemovalRequest,
    QueueFetchRequest, ServerMessage, SimpleResult, SingleByteAction, TrackInfo, TrackInfoRequest, VolumeChanged,
};
