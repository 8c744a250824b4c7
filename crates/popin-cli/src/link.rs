//! UDP loopback link
//!
//! Every node binds `host:(base_port + id)`. A datagram carries a three byte
//! header in front of the protocol frame:
//!
//! ```text
//! +-----------+---------+-------+---------------+
//! | source_id | rssi:i8 | snr:i8| payload ...   |
//! +-----------+---------+-------+---------------+
//! ```
//!
//! The sender stamps its configured RSSI so operators can place booths near
//! or far from each user. Broadcast fans out to every configured id except
//! the sender.
//!
//! Sends go through a non-blocking std socket so the synchronous link call
//! never waits on the runtime's readiness tracking; the tokio half of the
//! same socket only receives.

use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use popin_core::{InboxHandle, LinkLayer, NodeId, PopinError, ReceivedFrame, MAX_FRAME_LEN};

use crate::config::LinkConfig;
use crate::error::{CliError, Result};

/// Bytes in front of the protocol frame
pub const DATAGRAM_HEADER_LEN: usize = 3;

// ----------------------------------------------------------------------------
// Datagram Format
// ----------------------------------------------------------------------------

/// Wrap `payload` in a datagram header
pub fn encode_datagram(source: NodeId, rssi: i8, snr: i8, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(DATAGRAM_HEADER_LEN + payload.len());
    datagram.push(source.value());
    datagram.push(rssi as u8);
    datagram.push(snr as u8);
    datagram.extend_from_slice(payload);
    datagram
}

/// Split a datagram into a received frame
pub fn decode_datagram(datagram: &[u8]) -> Result<ReceivedFrame> {
    if datagram.len() <= DATAGRAM_HEADER_LEN {
        return Err(CliError::Datagram(format!(
            "{} bytes carry no payload",
            datagram.len()
        )));
    }

    let source = NodeId::new(datagram[0]);
    if source.value() == 0 || source.is_broadcast() {
        return Err(CliError::Datagram(format!(
            "source is reserved id {}",
            source
        )));
    }

    Ok(ReceivedFrame::new(
        source,
        datagram[DATAGRAM_HEADER_LEN..].to_vec(),
        i16::from(datagram[1] as i8),
        datagram[2] as i8,
    ))
}

/// Socket address node `id` listens on
pub fn node_addr(config: &LinkConfig, id: NodeId) -> Result<SocketAddr> {
    let port = config
        .base_port
        .checked_add(u16::from(id.value()))
        .ok_or_else(|| CliError::LinkInit(format!("No port for node {}", id)))?;
    format!("{}:{}", config.host, port)
        .parse()
        .map_err(|e| CliError::LinkInit(format!("Invalid address for node {}: {}", id, e)))
}

// ----------------------------------------------------------------------------
// UDP Link
// ----------------------------------------------------------------------------

/// Link layer over UDP sockets on one host
pub struct UdpLink {
    id: NodeId,
    config: LinkConfig,
    socket: Arc<UdpSocket>,
    sender: StdUdpSocket,
    confirmations: Option<InboxHandle>,
}

impl UdpLink {
    /// Bind the socket for node `id`
    pub async fn bind(id: NodeId, config: LinkConfig) -> Result<Self> {
        let addr = node_addr(&config, id)?;
        let bind_error =
            |e: std::io::Error| CliError::LinkInit(format!("Failed to bind {}: {}", addr, e));
        let std_socket = StdUdpSocket::bind(addr).map_err(bind_error)?;
        std_socket.set_nonblocking(true).map_err(bind_error)?;
        let sender = std_socket.try_clone().map_err(bind_error)?;
        let socket = UdpSocket::from_std(std_socket).map_err(bind_error)?;
        debug!("Node {} bound {}", id, addr);

        Ok(Self {
            id,
            config,
            socket: Arc::new(socket),
            sender,
            confirmations: None,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Raise the send-confirmed signal on `handle` after each transmission
    pub fn confirm_sends_to(&mut self, handle: InboxHandle) {
        self.confirmations = Some(handle);
    }

    /// Spawn the task that feeds received datagrams into the inbox
    pub fn spawn_receiver(&self, handle: InboxHandle) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let own_id = self.id;

        tokio::spawn(async move {
            let mut buf = vec![0u8; DATAGRAM_HEADER_LEN + MAX_FRAME_LEN + 64];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Node {} receive failed: {}", own_id, e);
                        continue;
                    }
                };

                match decode_datagram(&buf[..len]) {
                    Ok(frame) if frame.source == own_id => {
                        trace!("Node {} ignored its own datagram", own_id);
                    }
                    Ok(frame) => {
                        trace!(
                            "Node {} received {} bytes from node {} ({})",
                            own_id,
                            frame.payload.len(),
                            frame.source,
                            from
                        );
                        handle.deliver(frame);
                    }
                    Err(e) => warn!("Node {} dropped datagram from {}: {}", own_id, from, e),
                }
            }
        })
    }

    fn destinations(&self, dest: NodeId) -> Vec<NodeId> {
        if dest.is_broadcast() {
            (1..=self.config.max_node_id)
                .map(NodeId::new)
                .filter(|id| *id != self.id)
                .collect()
        } else {
            vec![dest]
        }
    }
}

impl LinkLayer for UdpLink {
    fn send(&mut self, payload: &[u8], dest: NodeId) -> popin_core::Result<()> {
        let datagram = encode_datagram(self.id, self.config.tx_rssi, self.config.snr, payload);

        let mut delivered = 0usize;
        let mut last_error = None;
        for target in self.destinations(dest) {
            let sent = node_addr(&self.config, target)
                .map_err(|e| e.to_string())
                .and_then(|addr| {
                    self.sender
                        .send_to(&datagram, addr)
                        .map_err(|e| e.to_string())
                });
            match sent {
                Ok(_) => delivered += 1,
                Err(e) => {
                    warn!("Node {} send to node {} failed: {}", self.id, target, e);
                    last_error = Some(format!("Send to node {} failed: {}", target, e));
                }
            }
        }

        // A broadcast counts as sent once any target got it
        if delivered == 0 {
            if let Some(reason) = last_error {
                return Err(PopinError::link_error(reason));
            }
        }

        if let Some(handle) = &self.confirmations {
            handle.confirm_send();
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
