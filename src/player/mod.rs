//! Playback state: the `Player` state machine and the `DelayedStart` timer
//! (spec §4.6, §4.7).

pub mod delayed_start;
pub mod player;

pub use delayed_start::DelayedStart;
pub use player::{NowPlaying, Player, PlayerEvent, PlayerState};
