//! UDP LAN discovery: answers a probe broadcast with the server's TCP port
//! (spec §6.1). Grounded on the teacher's `cast_manager.rs` accept-loop
//! shape (bind once, loop forever, log and continue past per-datagram
//! errors), adapted to `tokio::net::UdpSocket`.

use std::net::SocketAddr;

use log::{debug, info, warn};
use tokio::net::UdpSocket;

use crate::protocol::codec::{DISCOVERY_ANNOUNCE_PREFIX, DISCOVERY_PROBE};

/// Binds the discovery responder to `0.0.0.0:<bind_port>` and serves
/// requests forever, advertising `tcp_port` as the server's control port.
/// Returns only on a bind failure; a malformed or foreign datagram is
/// logged and ignored.
pub async fn run(bind_port: u16, tcp_port: u16) -> std::io::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", bind_port)).await?;
    info!("discovery: listening for probes on UDP {}", bind_port);
    let mut buf = [0u8; 256];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(result) => result,
            Err(err) => {
                warn!("discovery: recv_from failed: {}", err);
                continue;
            }
        };
        handle_datagram(&socket, &buf[..len], peer, tcp_port).await;
    }
}

async fn handle_datagram(socket: &UdpSocket, datagram: &[u8], peer: SocketAddr, tcp_port: u16) {
    if datagram != DISCOVERY_PROBE {
        debug!("discovery: ignoring non-probe datagram from {}", peer);
        return;
    }
    let mut reply = Vec::with_capacity(DISCOVERY_ANNOUNCE_PREFIX.len() + 2);
    reply.extend_from_slice(DISCOVERY_ANNOUNCE_PREFIX);
    reply.extend_from_slice(&tcp_port.to_be_bytes());
    if let Err(err) = socket.send_to(&reply, peer).await {
        warn!("discovery: send_to {} failed: {}", peer, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_gets_an_announce_back_with_the_tcp_port() {
        let server = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();

        client.send_to(DISCOVERY_PROBE, server_addr).await.unwrap();
        let mut buf = [0u8; 256];
        let (len, peer) = server.recv_from(&mut buf).await.unwrap();
        handle_datagram(&server, &buf[..len], peer, 23433).await;

        let mut reply_buf = [0u8; 256];
        let (reply_len, _) = client.recv_from(&mut reply_buf).await.unwrap();
        let reply = &reply_buf[..reply_len];
        assert!(reply.starts_with(DISCOVERY_ANNOUNCE_PREFIX));
        let port_bytes = &reply[DISCOVERY_ANNOUNCE_PREFIX.len()..];
        assert_eq!(u16::from_be_bytes([port_bytes[0], port_bytes[1]]), 23433);
    }

    #[tokio::test]
    async fn non_probe_datagrams_get_no_reply() {
        let server = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();

        client.send_to(b"not a probe", server_addr).await.unwrap();
        let mut buf = [0u8; 256];
        let (len, peer) = server.recv_from(&mut buf).await.unwrap();
        handle_datagram(&server, &buf[..len], peer, 1).await;

        client.send_to(DISCOVERY_PROBE, server_addr).await.unwrap();
        let (len2, peer2) = server.recv_from(&mut buf).await.unwrap();
        handle_datagram(&server, &buf[..len2], peer2, 1).await;

        let mut reply_buf = [0u8; 256];
        let (reply_len, _) = client.recv_from(&mut reply_buf).await.unwrap();
        assert!(&reply_buf[..reply_len] == b"PMPSERVERANNOUNCEv01 \x00\x01");
    }
}
