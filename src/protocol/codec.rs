//! Binary-mode framing and message (de)serialization (spec §6.1).
//!
//! After the `binary` handshake, every message is
//! `[u32 big-endian length][length bytes of payload]`, with the payload
//! itself starting with a `u16` message type. All integers are big-endian.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::messages::*;

/// `"PMP" <protoHi> <protoLo>`, exchanged by both sides right after the text
/// command `binary` is sent.
pub const HANDSHAKE_PREFIX: &[u8; 3] = b"PMP";
pub const PROTOCOL_VERSION_HI: u8 = 1;
pub const PROTOCOL_VERSION_LO: u8 = 0;

pub const DISCOVERY_PROBE: &[u8] = b"PMPPROBEv01";
pub const DISCOVERY_ANNOUNCE_PREFIX: &[u8] = b"PMPSERVERANNOUNCEv01 ";

pub mod message_type {
    pub const SINGLE_BYTE_ACTION: u16 = 1;
    pub const TRACK_INFO_REQUEST: u16 = 2;
    pub const BULK_TRACK_INFO_REQUEST: u16 = 3;
    pub const QUEUE_FETCH_REQUEST: u16 = 4;
    pub const QUEUE_ENTRY_REMOVAL_REQUEST: u16 = 5;
    pub const QUEUE_ENTRY_MOVE_REQUEST: u16 = 6;
    pub const PLAYER_SEEK_REQUEST: u16 = 7;

    pub const PLAYER_STATE: u16 = 100;
    pub const VOLUME_CHANGED: u16 = 101;
    pub const DYNAMIC_MODE_STATUS: u16 = 102;
    pub const QUEUE_CONTENTS: u16 = 103;
    pub const QUEUE_ENTRY_ADDED: u16 = 104;
    pub const QUEUE_ENTRY_REMOVED: u16 = 105;
    pub const QUEUE_ENTRY_MOVED: u16 = 106;
    pub const TRACK_INFO: u16 = 107;
    pub const BULK_TRACK_INFO: u16 = 108;
    pub const SIMPLE_RESULT: u16 = 109;
}

fn truncated(context: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, format!("truncated {context}"))
}

/// Writes the length-prefixed frame for `payload`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Reads one length-prefixed frame's payload.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

pub async fn write_handshake<W: AsyncWrite + Unpin>(writer: &mut W) -> io::Result<()> {
    writer.write_all(HANDSHAKE_PREFIX).await?;
    writer.write_all(&[PROTOCOL_VERSION_HI, PROTOCOL_VERSION_LO]).await?;
    writer.flush().await
}

pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<(u8, u8)> {
    let mut buf = [0u8; 5];
    reader.read_exact(&mut buf).await?;
    if &buf[0..3] != HANDSHAKE_PREFIX {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad protocol handshake prefix"));
    }
    Ok((buf[3], buf[4]))
}

fn write_u16_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn read_u16_string(payload: &[u8], pos: &mut usize) -> io::Result<String> {
    if payload.len() < *pos + 2 {
        return Err(truncated("string length"));
    }
    let len = u16::from_be_bytes([payload[*pos], payload[*pos + 1]]) as usize;
    *pos += 2;
    if payload.len() < *pos + len {
        return Err(truncated("string bytes"));
    }
    let s = String::from_utf8_lossy(&payload[*pos..*pos + len]).into_owned();
    *pos += len;
    Ok(s)
}

pub fn encode_client_message(message: &ClientMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match message {
        ClientMessage::Action(action) => {
            buf.extend_from_slice(&message_type::SINGLE_BYTE_ACTION.to_be_bytes());
            buf.push(action.code());
        }
        ClientMessage::TrackInfo(request) => {
            buf.extend_from_slice(&message_type::TRACK_INFO_REQUEST.to_be_bytes());
            buf.extend_from_slice(&request.queue_id.to_be_bytes());
        }
        ClientMessage::BulkTrackInfo(request) => {
            buf.extend_from_slice(&message_type::BULK_TRACK_INFO_REQUEST.to_be_bytes());
            for id in &request.queue_ids {
                buf.extend_from_slice(&id.to_be_bytes());
            }
        }
        ClientMessage::QueueFetch(request) => {
            buf.extend_from_slice(&message_type::QUEUE_FETCH_REQUEST.to_be_bytes());
            buf.extend_from_slice(&request.offset.to_be_bytes());
            buf.push(request.length);
        }
        ClientMessage::QueueEntryRemoval(request) => {
            buf.extend_from_slice(&message_type::QUEUE_ENTRY_REMOVAL_REQUEST.to_be_bytes());
            buf.extend_from_slice(&request.queue_id.to_be_bytes());
        }
        ClientMessage::QueueEntryMove(request) => {
            buf.extend_from_slice(&message_type::QUEUE_ENTRY_MOVE_REQUEST.to_be_bytes());
            buf.extend_from_slice(&request.delta.to_be_bytes());
            buf.extend_from_slice(&request.queue_id.to_be_bytes());
        }
        ClientMessage::PlayerSeek(request) => {
            buf.extend_from_slice(&message_type::PLAYER_SEEK_REQUEST.to_be_bytes());
            buf.extend_from_slice(&request.queue_id.to_be_bytes());
            buf.extend_from_slice(&request.position_ms.to_be_bytes());
        }
    }
    buf
}

pub fn decode_client_message(payload: &[u8]) -> io::Result<ClientMessage> {
    if payload.len() < 2 {
        return Err(truncated("message type"));
    }
    let msg_type = u16::from_be_bytes([payload[0], payload[1]]);
    let body = &payload[2..];
    match msg_type {
        message_type::SINGLE_BYTE_ACTION => {
            let code = *body.first().ok_or_else(|| truncated("action code"))?;
            let action = ClientAction::from_code(code)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown action code"))?;
            Ok(ClientMessage::Action(action))
        }
        message_type::TRACK_INFO_REQUEST => {
            if body.len() < 4 {
                return Err(truncated("TrackInfoRequest"));
            }
            let queue_id = u32::from_be_bytes(body[0..4].try_into().unwrap());
            Ok(ClientMessage::TrackInfo(TrackInfoRequest { queue_id }))
        }
        message_type::BULK_TRACK_INFO_REQUEST => {
            if body.len() % 4 != 0 {
                return Err(truncated("BulkTrackInfoRequest"));
            }
            let queue_ids = body
                .chunks_exact(4)
                .map(|chunk| u32::from_be_bytes(chunk.try_into().unwrap()))
                .collect();
            Ok(ClientMessage::BulkTrackInfo(BulkTrackInfoRequest { queue_ids }))
        }
        message_type::QUEUE_FETCH_REQUEST => {
            if body.len() < 5 {
                return Err(truncated("QueueFetchRequest"));
            }
            let offset = u32::from_be_bytes(body[0..4].try_into().unwrap());
            let length = body[4];
            Ok(ClientMessage::QueueFetch(QueueFetchRequest { offset, length }))
        }
        message_type::QUEUE_ENTRY_REMOVAL_REQUEST => {
            if body.len() < 4 {
                return Err(truncated("QueueEntryRemovalRequest"));
            }
            let queue_id = u32::from_be_bytes(body[0..4].try_into().unwrap());
            Ok(ClientMessage::QueueEntryRemoval(QueueEntryRemovalRequest { queue_id }))
        }
        message_type::QUEUE_ENTRY_MOVE_REQUEST => {
            if body.len() < 6 {
                return Err(truncated("QueueEntryMoveRequest"));
            }
            let delta = i16::from_be_bytes(body[0..2].try_into().unwrap());
            let queue_id = u32::from_be_bytes(body[2..6].try_into().unwrap());
            Ok(ClientMessage::QueueEntryMove(QueueEntryMoveRequest { delta, queue_id }))
        }
        message_type::PLAYER_SEEK_REQUEST => {
            if body.len() < 12 {
                return Err(truncated("PlayerSeekRequest"));
            }
            let queue_id = u32::from_be_bytes(body[0..4].try_into().unwrap());
            let position_ms = i64::from_be_bytes(body[4..12].try_into().unwrap());
            Ok(ClientMessage::PlayerSeek(PlayerSeekRequest { queue_id, position_ms }))
        }
        other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown message type {other}"))),
    }
}

pub fn encode_server_message(message: &ServerMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match message {
        ServerMessage::PlayerState(state) => {
            buf.extend_from_slice(&message_type::PLAYER_STATE.to_be_bytes());
            buf.push(state.state);
            buf.push(state.volume);
            buf.extend_from_slice(&state.queue_length.to_be_bytes());
            buf.extend_from_slice(&state.now_playing_id.to_be_bytes());
            buf.extend_from_slice(&state.position_ms.to_be_bytes());
        }
        ServerMessage::VolumeChanged(v) => {
            buf.extend_from_slice(&message_type::VOLUME_CHANGED.to_be_bytes());
            buf.push(v.volume);
        }
        ServerMessage::DynamicModeStatus(status) => {
            buf.extend_from_slice(&message_type::DYNAMIC_MODE_STATUS.to_be_bytes());
            buf.push(status.enabled as u8);
            buf.extend_from_slice(&status.no_repetition_seconds.to_be_bytes());
        }
        ServerMessage::QueueContents(contents) => {
            buf.extend_from_slice(&message_type::QUEUE_CONTENTS.to_be_bytes());
            buf.extend_from_slice(&contents.queue_length.to_be_bytes());
            buf.extend_from_slice(&contents.start_offset.to_be_bytes());
            for id in &contents.queue_ids {
                buf.extend_from_slice(&id.to_be_bytes());
            }
        }
        ServerMessage::QueueEntry(event) => match event {
            QueueEntryEvent::Added { offset, id } => {
                buf.extend_from_slice(&message_type::QUEUE_ENTRY_ADDED.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(&id.to_be_bytes());
            }
            QueueEntryEvent::Removed { offset, id } => {
                buf.extend_from_slice(&message_type::QUEUE_ENTRY_REMOVED.to_be_bytes());
                buf.extend_from_slice(&offset.to_be_bytes());
                buf.extend_from_slice(&id.to_be_bytes());
            }
            QueueEntryEvent::Moved { from, to, id } => {
                buf.extend_from_slice(&message_type::QUEUE_ENTRY_MOVED.to_be_bytes());
                buf.extend_from_slice(&from.to_be_bytes());
                buf.extend_from_slice(&to.to_be_bytes());
                buf.extend_from_slice(&id.to_be_bytes());
            }
        },
        ServerMessage::TrackInfo(info) => {
            buf.extend_from_slice(&message_type::TRACK_INFO.to_be_bytes());
            encode_track_info_body(&mut buf, info);
        }
        ServerMessage::BulkTrackInfo(bulk) => {
            buf.extend_from_slice(&message_type::BULK_TRACK_INFO.to_be_bytes());
            buf.extend_from_slice(&(bulk.entries.len() as u16).to_be_bytes());
            for entry in &bulk.entries {
                encode_track_info_body(&mut buf, entry);
            }
        }
        ServerMessage::SimpleResult(result) => {
            buf.extend_from_slice(&message_type::SIMPLE_RESULT.to_be_bytes());
            buf.extend_from_slice(&result.error_code.to_be_bytes());
            buf.extend_from_slice(&result.client_reference.to_be_bytes());
            buf.extend_from_slice(&result.int_data.to_be_bytes());
            buf.extend_from_slice(&result.blob);
        }
    }
    buf
}

fn encode_track_info_body(buf: &mut Vec<u8>, info: &TrackInfo) {
    buf.extend_from_slice(&info.status.to_be_bytes());
    buf.extend_from_slice(&info.queue_id.to_be_bytes());
    buf.extend_from_slice(&info.length_seconds.to_be_bytes());
    write_u16_string(buf, &info.title);
    write_u16_string(buf, &info.artist);
}

fn decode_track_info_body(payload: &[u8], pos: &mut usize) -> io::Result<TrackInfo> {
    if payload.len() < *pos + 10 {
        return Err(truncated("TrackInfo header"));
    }
    let status = u16::from_be_bytes(payload[*pos..*pos + 2].try_into().unwrap());
    let queue_id = u32::from_be_bytes(payload[*pos + 2..*pos + 6].try_into().unwrap());
    let length_seconds = i32::from_be_bytes(payload[*pos + 6..*pos + 10].try_into().unwrap());
    *pos += 10;
    let title = read_u16_string(payload, pos)?;
    let artist = read_u16_string(payload, pos)?;
    Ok(TrackInfo {
        status,
        queue_id,
        length_seconds,
        title,
        artist,
    })
}
