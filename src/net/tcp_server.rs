//! Dual-mode TCP listener: accepts connections, walks each one through the
//! line-text bootstrap, then dispatches binary-framed requests against
//! [`ServerInterface`] (spec §6.1). Grounded on the teacher's
//! `cast_manager.rs` accept-loop shape (bind once, spawn a task per
//! connection, log and continue past per-connection errors), adapted to
//! `tokio::net::TcpListener`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;

use crate::protocol::codec;
use crate::protocol::messages::*;
use crate::server_interface::{ServerEvent, ServerInterface};

const COMMAND_TERMINATOR: u8 = b';';
const MAX_BOOTSTRAP_COMMAND_LEN: usize = 256;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Binds `bind_addr` and serves connections until the listener itself fails.
pub async fn run(bind_addr: (&str, u16), server: Arc<ServerInterface>, fixed_password: Option<String>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("tcp_server: listening on {}:{}", bind_addr.0, bind_addr.1);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                warn!("tcp_server: accept failed: {}", err);
                continue;
            }
        };
        let server = server.clone();
        let fixed_password = fixed_password.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, server, fixed_password).await {
                debug!("tcp_server: connection {} ended: {}", peer, err);
            }
        });
    }
}

/// Reads line-text commands terminated by `;` until the client sends
/// `binary`, then switches to framed binary dispatch for the rest of the
/// connection's lifetime.
async fn handle_connection(
    stream: TcpStream,
    server: Arc<ServerInterface>,
    fixed_password: Option<String>,
) -> std::io::Result<()> {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    loop {
        let command = match read_bootstrap_command(&mut reader).await? {
            Some(command) => command,
            None => return Ok(()),
        };
        if command.eq_ignore_ascii_case("binary") {
            break;
        }
        debug!("tcp_server: ignoring unrecognized bootstrap command {:?}", command);
    }

    codec::write_handshake(&mut writer).await?;
    let (_hi, _lo) = codec::read_handshake(&mut reader).await?;

    run_binary_session(reader, writer, server, fixed_password).await
}

async fn read_bootstrap_command<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut buf = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Ok(None);
        }
        if byte[0] == COMMAND_TERMINATOR {
            let command = String::from_utf8_lossy(&buf).trim().to_string();
            return Ok(Some(command));
        }
        if buf.len() < MAX_BOOTSTRAP_COMMAND_LEN {
            buf.push(byte[0]);
        }
    }
}

async fn run_binary_session(
    mut reader: impl AsyncRead + Unpin + Send + 'static,
    writer: tokio::net::tcp::OwnedWriteHalf,
    server: Arc<ServerInterface>,
    // No login request travels on the wire surface this module decodes yet;
    // kept so `ServerInterface::check_password` has a caller to wire up once
    // one is added.
    _fixed_password: Option<String>,
) -> std::io::Result<()> {
    let writer = Arc::new(AsyncMutex::new(writer));

    let push_writer = writer.clone();
    let push_server = server.clone();
    let mut events = server.subscribe();
    let push_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            };
            if let Some(message) = translate_event(&push_server, event) {
                let payload = codec::encode_server_message(&message);
                let mut guard = push_writer.lock().await;
                if codec::write_frame(&mut *guard, &payload).await.is_err() {
                    return;
                }
            }
        }
    });

    loop {
        let payload = match codec::read_frame(&mut reader).await {
            Ok(payload) => payload,
            Err(_) => break,
        };
        let message = match codec::decode_client_message(&payload) {
            Ok(message) => message,
            Err(err) => {
                debug!("tcp_server: dropping malformed frame: {}", err);
                continue;
            }
        };
        if let Some(reply) = dispatch(&server, message) {
            let payload = codec::encode_server_message(&reply);
            let mut guard = writer.lock().await;
            if codec::write_frame(&mut *guard, &payload).await.is_err() {
                break;
            }
        }
    }

    push_task.abort();
    Ok(())
}

fn player_state_message(server: &ServerInterface) -> PlayerStateMessage {
    PlayerStateMessage {
        state: server.player_state().wire_code(),
        volume: server.volume(),
        queue_length: server.queue_len() as u32,
        now_playing_id: server.now_playing_queue_id().map(|id| id.0).unwrap_or(0),
        position_ms: server.position_ms().max(0) as u64,
    }
}

fn translate_event(server: &ServerInterface, event: ServerEvent) -> Option<ServerMessage> {
    match event {
        ServerEvent::Player(_) => Some(ServerMessage::PlayerState(player_state_message(server))),
        ServerEvent::VolumeChanged(volume) => Some(ServerMessage::VolumeChanged(VolumeChanged { volume })),
        ServerEvent::DynamicModeChanged { enabled, no_repetition_seconds } => {
            Some(ServerMessage::DynamicModeStatus(DynamicModeStatus {
                enabled,
                no_repetition_seconds: no_repetition_seconds.max(0) as u32,
            }))
        }
        ServerEvent::Queue(_) | ServerEvent::ModeChanged { .. } => None,
    }
}

fn track_info_for(server: &ServerInterface, queue_id: crate::queue::QueueId) -> TrackInfo {
    use crate::queue::QueueItem;

    match server.track_info(queue_id) {
        None => TrackInfo {
            status: track_info_status::UNKNOWN_ID,
            queue_id: queue_id.0,
            length_seconds: -1,
            title: String::new(),
            artist: String::new(),
        },
        Some(QueueItem::Barrier) => TrackInfo {
            status: track_info_status::BARRIER,
            queue_id: queue_id.0,
            length_seconds: -1,
            title: String::new(),
            artist: String::new(),
        },
        Some(QueueItem::Break) => TrackInfo {
            status: track_info_status::BREAK,
            queue_id: queue_id.0,
            length_seconds: -1,
            title: String::new(),
            artist: String::new(),
        },
        Some(QueueItem::Track { cached_audio, cached_tags, .. }) => {
            let length_seconds = cached_audio
                .and_then(|audio| if audio.length_known() { Some((audio.track_length_ms / 1000) as i32) } else { None })
                .unwrap_or(-1);
            let (title, artist) = cached_tags
                .map(|tags| (tags.title.unwrap_or_default(), tags.artist.unwrap_or_default()))
                .unwrap_or_default();
            TrackInfo {
                status: track_info_status::TRACK,
                queue_id: queue_id.0,
                length_seconds,
                title,
                artist,
            }
        }
    }
}

fn simple_result(error_code: u16) -> ServerMessage {
    ServerMessage::SimpleResult(SimpleResult {
        error_code,
        client_reference: 0,
        int_data: 0,
        blob: Vec::new(),
    })
}

fn result_of<T>(result: Result<T, crate::error::PmpError>) -> ServerMessage {
    match result {
        Ok(_) => simple_result(0),
        Err(err) => simple_result(err.code as u16),
    }
}

fn dispatch(server: &Arc<ServerInterface>, message: ClientMessage) -> Option<ServerMessage> {
    use crate::queue::QueueId;

    match message {
        ClientMessage::Action(ClientAction::SetVolume(percent)) => {
            server.set_volume(percent);
            None
        }
        ClientMessage::Action(ClientAction::Single(action)) => dispatch_single_byte(server, action),
        ClientMessage::TrackInfo(request) => Some(ServerMessage::TrackInfo(track_info_for(server, QueueId(request.queue_id)))),
        ClientMessage::BulkTrackInfo(request) => Some(ServerMessage::BulkTrackInfo(BulkTrackInfo {
            entries: request.queue_ids.into_iter().map(|id| track_info_for(server, QueueId(id))).collect(),
        })),
        ClientMessage::QueueFetch(request) => {
            let entries = server.queue_fetch(request.offset as usize, request.length as usize);
            Some(ServerMessage::QueueContents(QueueContents {
                queue_length: server.queue_len() as u32,
                start_offset: request.offset,
                queue_ids: entries.into_iter().map(|(id, _)| id.0).collect(),
            }))
        }
        ClientMessage::QueueEntryRemoval(request) => Some(result_of(server.queue_remove(QueueId(request.queue_id)))),
        ClientMessage::QueueEntryMove(request) => {
            Some(result_of(server.queue_move(QueueId(request.queue_id), request.delta as i64)))
        }
        ClientMessage::PlayerSeek(request) => {
            match server.now_playing_queue_id() {
                Some(id) if id == QueueId(request.queue_id) => {
                    server.seek_to(request.position_ms);
                    Some(simple_result(0))
                }
                _ => Some(simple_result(crate::error::ErrorCode::QueueIdNotFound as u16)),
            }
        }
    }
}

fn dispatch_single_byte(server: &Arc<ServerInterface>, action: SingleByteAction) -> Option<ServerMessage> {
    let now = now_ms();
    match action {
        SingleByteAction::Play => {
            server.play(now);
            None
        }
        SingleByteAction::Pause => {
            server.pause();
            None
        }
        SingleByteAction::Skip => {
            server.skip(now);
            None
        }
        SingleByteAction::BreakAtFront => Some(result_of(server.break_at_front().map(|_| ()))),
        SingleByteAction::GetState => Some(ServerMessage::PlayerState(player_state_message(server))),
        SingleByteAction::GetDynStatus => {
            let (enabled, seconds) = server.dyn_status();
            Some(ServerMessage::DynamicModeStatus(DynamicModeStatus {
                enabled,
                no_repetition_seconds: seconds.max(0) as u32,
            }))
        }
        SingleByteAction::GetUuid => None,
        SingleByteAction::ListUsers => None,
        SingleByteAction::GetMode => {
            Some(simple_result(if server.is_public_mode() { 0 } else { 1 }))
        }
        SingleByteAction::GetIndexation => None,
        SingleByteAction::DynEnable => {
            server.dyn_enable();
            None
        }
        SingleByteAction::DynDisable => {
            server.dyn_disable();
            None
        }
        SingleByteAction::DynExpand => None,
        SingleByteAction::QueueTrim => {
            // No trim length travels on this single-byte action; clearing
            // the whole upcoming queue is the simplest faithful reading.
            server.queue_trim(0);
            None
        }
        SingleByteAction::PublicMode => {
            server.set_public_mode();
            None
        }
        SingleByteAction::PersonalMode => None,
        SingleByteAction::FullIndexation => {
            let server = server.clone();
            tokio::spawn(async move { server.run_full_indexation().await });
            None
        }
        SingleByteAction::Shutdown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history_store::InMemoryHistoryStore;
    use std::sync::Arc as StdArc;
    use tokio::io::{duplex, AsyncWriteExt};

    fn build_server() -> StdArc<ServerInterface> {
        let history: StdArc<dyn crate::history_store::HistoryStore> = StdArc::new(InMemoryHistoryStore::new());
        StdArc::new(ServerInterface::new(
            history,
            50,
            std::env::temp_dir().join("pmp_net_test_cache"),
            Vec::new(),
        ))
    }

    #[tokio::test]
    async fn bootstrap_reads_the_binary_command_up_to_the_terminator() {
        let (mut client, server_side) = duplex(64);
        client.write_all(b"binary;").await.unwrap();
        drop(client);
        let mut reader = BufReader::new(server_side);
        let command = read_bootstrap_command(&mut reader).await.unwrap();
        assert_eq!(command.as_deref(), Some("binary"));
    }

    #[test]
    fn get_state_action_reports_the_current_player_state() {
        let server = build_server();
        let reply = dispatch_single_byte(&server, SingleByteAction::GetState);
        match reply {
            Some(ServerMessage::PlayerState(state)) => assert_eq!(state.volume, 50),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn seek_is_rejected_when_the_queue_id_is_not_now_playing() {
        let server = build_server();
        let reply = dispatch(
            &server,
            ClientMessage::PlayerSeek(PlayerSeekRequest { queue_id: 999, position_ms: 1000 }),
        );
        match reply {
            Some(ServerMessage::SimpleResult(result)) => assert_ne!(result.error_code, 0),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn track_info_for_unknown_id_reports_unknown_status() {
        let server = build_server();
        let info = track_info_for(&server, crate::queue::QueueId(12345));
        assert_eq!(info.status, track_info_status::UNKNOWN_ID);
    }
}
