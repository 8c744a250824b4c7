//! Pop-in message format and binary wire codec
//!
//! Every frame is a one-byte type tag followed by a type-specific payload of
//! single-byte integers and NUL-terminated text. Decoding validates the
//! payload length before any field is read, so a short or malformed frame
//! becomes a [`PacketError`] instead of an out-of-bounds access.

use serde::{Deserialize, Serialize};

use crate::errors::PacketError;
use crate::types::{NodeId, Role};

// ----------------------------------------------------------------------------
// Protocol Constants
// ----------------------------------------------------------------------------

/// Offset of the type tag
pub const OFFSET_TYPE: usize = 0;

/// Offset of the first payload byte
pub const OFFSET_DATA: usize = 1;

/// Maximum chat/admin text length, excluding the terminator
pub const MAX_TEXT_LEN: usize = 100;

/// Maximum booth description length, excluding the terminator
pub const MAX_DESCRIPTION_LEN: usize = 49;

/// Largest frame the codec produces (relayed chat with full text)
pub const MAX_FRAME_LEN: usize = OFFSET_DATA + 1 + MAX_TEXT_LEN + 1;

// ----------------------------------------------------------------------------
// Message Types
// ----------------------------------------------------------------------------

/// Message type tags for the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Reserved, never sent
    UserInfoRequest = 0x01,
    ConnectRequest = 0x02,
    /// Reserved, never sent
    ConnectResponse = 0x03,
    BoothInfo = 0x04,
    UserResponse = 0x05,
    RegisterRequest = 0x06,
    RegisterResponse = 0x07,
    /// Reserved, never sent
    QueueJoinRequest = 0x08,
    QueueInfo = 0x09,
    ExitRequest = 0x0A,
    TimeoutAlert = 0x0B,
    AdminMessage = 0x0C,
    ChatMessage = 0x0D,
    BoothScan = 0x0E,
    BoothAnnounce = 0x0F,
    ExitResponse = 0x10,
    QueueReady = 0x11,
    /// Reserved, never sent
    QueueReadyAck = 0x12,
    QueueUpdate = 0x13,
    QueueLeave = 0x14,
}

impl MessageType {
    /// Convert from raw byte value
    pub fn from_u8(value: u8) -> Result<Self, PacketError> {
        match value {
            0x01 => Ok(MessageType::UserInfoRequest),
            0x02 => Ok(MessageType::ConnectRequest),
            0x03 => Ok(MessageType::ConnectResponse),
            0x04 => Ok(MessageType::BoothInfo),
            0x05 => Ok(MessageType::UserResponse),
            0x06 => Ok(MessageType::RegisterRequest),
            0x07 => Ok(MessageType::RegisterResponse),
            0x08 => Ok(MessageType::QueueJoinRequest),
            0x09 => Ok(MessageType::QueueInfo),
            0x0A => Ok(MessageType::ExitRequest),
            0x0B => Ok(MessageType::TimeoutAlert),
            0x0C => Ok(MessageType::AdminMessage),
            0x0D => Ok(MessageType::ChatMessage),
            0x0E => Ok(MessageType::BoothScan),
            0x0F => Ok(MessageType::BoothAnnounce),
            0x10 => Ok(MessageType::ExitResponse),
            0x11 => Ok(MessageType::QueueReady),
            0x12 => Ok(MessageType::QueueReadyAck),
            0x13 => Ok(MessageType::QueueUpdate),
            0x14 => Ok(MessageType::QueueLeave),
            _ => Err(PacketError::UnknownMessageType {
                message_type: value,
            }),
        }
    }

    /// Convert to raw byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Tags kept in the numbering but not part of the exchange
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            MessageType::UserInfoRequest
                | MessageType::ConnectResponse
                | MessageType::QueueJoinRequest
                | MessageType::QueueReadyAck
        )
    }
}

/// Raw type tag of a frame, without validation of the rest
pub fn frame_type(frame: &[u8]) -> Option<u8> {
    frame.get(OFFSET_TYPE).copied()
}

/// Raw payload of a frame (empty when the frame has no payload)
pub fn frame_payload(frame: &[u8]) -> &[u8] {
    frame.get(OFFSET_DATA..).unwrap_or(&[])
}

// ----------------------------------------------------------------------------
// Payload Types
// ----------------------------------------------------------------------------

/// Occupancy summary carried by BOOTH_ANNOUNCE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoothStatus {
    pub booth_id: NodeId,
    pub current_count: u8,
    pub capacity: u8,
    pub waiting_count: u8,
}

impl BoothStatus {
    /// Whether at least one slot is free
    pub fn has_free_slot(&self) -> bool {
        self.current_count < self.capacity
    }
}

/// Reason code carried by REGISTER_RESPONSE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RegisterReason {
    Success = 0,
    AlreadyUsed = 1,
    FullWaiting = 2,
}

impl RegisterReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RegisterReason::Success),
            1 => Some(RegisterReason::AlreadyUsed),
            2 => Some(RegisterReason::FullWaiting),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    BoothScan,
    BoothAnnounce(BoothStatus),
    ConnectRequest,
    BoothInfo {
        current_count: u8,
        capacity: u8,
        waiting_count: u8,
        description: String,
    },
    UserResponse {
        accept: bool,
    },
    RegisterRequest,
    RegisterResponse {
        success: bool,
        reason: RegisterReason,
    },
    QueueInfo {
        position: u8,
        total: u8,
    },
    /// Position and total of zero mean the receiver was removed
    QueueUpdate {
        position: u8,
        total: u8,
    },
    QueueReady,
    QueueLeave,
    ExitRequest,
    ExitResponse {
        success: bool,
    },
    TimeoutAlert,
    AdminMessage {
        text: String,
    },
    /// `sender` is present only on chat relayed by an admin
    Chat {
        sender: Option<NodeId>,
        text: String,
    },
}

impl Message {
    /// Wire tag for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::BoothScan => MessageType::BoothScan,
            Message::BoothAnnounce(_) => MessageType::BoothAnnounce,
            Message::ConnectRequest => MessageType::ConnectRequest,
            Message::BoothInfo { .. } => MessageType::BoothInfo,
            Message::UserResponse { .. } => MessageType::UserResponse,
            Message::RegisterRequest => MessageType::RegisterRequest,
            Message::RegisterResponse { .. } => MessageType::RegisterResponse,
            Message::QueueInfo { .. } => MessageType::QueueInfo,
            Message::QueueUpdate { .. } => MessageType::QueueUpdate,
            Message::QueueReady => MessageType::QueueReady,
            Message::QueueLeave => MessageType::QueueLeave,
            Message::ExitRequest => MessageType::ExitRequest,
            Message::ExitResponse { .. } => MessageType::ExitResponse,
            Message::TimeoutAlert => MessageType::TimeoutAlert,
            Message::AdminMessage { .. } => MessageType::AdminMessage,
            Message::Chat { .. } => MessageType::ChatMessage,
        }
    }

    /// Encode to an owned frame
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.push(self.message_type().as_u8());

        match self {
            Message::BoothScan
            | Message::ConnectRequest
            | Message::RegisterRequest
            | Message::QueueLeave
            | Message::ExitRequest => {}
            Message::BoothAnnounce(status) => {
                out.extend_from_slice(&[
                    status.booth_id.value(),
                    status.current_count,
                    status.capacity,
                    status.waiting_count,
                ]);
            }
            Message::BoothInfo {
                current_count,
                capacity,
                waiting_count,
                description,
            } => {
                out.extend_from_slice(&[*current_count, *capacity, *waiting_count]);
                push_text(&mut out, description, MAX_DESCRIPTION_LEN);
            }
            Message::UserResponse { accept } => out.push(u8::from(*accept)),
            Message::RegisterResponse { success, reason } => {
                out.extend_from_slice(&[u8::from(*success), *reason as u8]);
            }
            Message::QueueInfo { position, total } | Message::QueueUpdate { position, total } => {
                out.extend_from_slice(&[*position, *total]);
            }
            Message::QueueReady | Message::TimeoutAlert => out.push(0),
            Message::ExitResponse { success } => out.push(u8::from(*success)),
            Message::AdminMessage { text } => push_text(&mut out, text, MAX_TEXT_LEN),
            Message::Chat { sender, text } => {
                if let Some(sender) = sender {
                    out.push(sender.value());
                }
                push_text(&mut out, text, MAX_TEXT_LEN);
            }
        }

        out
    }

    /// Encode into `buf`, returning the total encoded length
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let bytes = self.encode();
        let available = buf.len();
        let target = buf
            .get_mut(..bytes.len())
            .ok_or(PacketError::BufferTooSmall {
                needed: bytes.len(),
                available,
            })?;
        target.copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Decode a frame sent by a node with role `source`
    ///
    /// The source role only matters for CHAT_MESSAGE, which carries a sender
    /// prefix when an admin relays it.
    pub fn decode(frame: &[u8], source: Role) -> Result<Self, PacketError> {
        let (&tag, payload) = frame.split_first().ok_or(PacketError::Empty)?;
        let message_type = MessageType::from_u8(tag)?;
        if message_type.is_reserved() {
            return Err(PacketError::ReservedMessageType { message_type });
        }

        let message = match message_type {
            MessageType::BoothScan => Message::BoothScan,
            MessageType::ConnectRequest => Message::ConnectRequest,
            MessageType::RegisterRequest => Message::RegisterRequest,
            MessageType::QueueLeave => Message::QueueLeave,
            MessageType::ExitRequest => Message::ExitRequest,
            MessageType::QueueReady => Message::QueueReady,
            MessageType::TimeoutAlert => Message::TimeoutAlert,
            MessageType::BoothAnnounce => {
                require(message_type, payload, 4)?;
                Message::BoothAnnounce(BoothStatus {
                    booth_id: NodeId::new(payload[0]),
                    current_count: payload[1],
                    capacity: payload[2],
                    waiting_count: payload[3],
                })
            }
            MessageType::BoothInfo => {
                require(message_type, payload, 4)?;
                Message::BoothInfo {
                    current_count: payload[0],
                    capacity: payload[1],
                    waiting_count: payload[2],
                    description: read_text(message_type, &payload[3..], MAX_DESCRIPTION_LEN)?,
                }
            }
            MessageType::UserResponse => {
                require(message_type, payload, 1)?;
                Message::UserResponse {
                    accept: read_flag(message_type, "response", payload[0])?,
                }
            }
            MessageType::RegisterResponse => {
                require(message_type, payload, 2)?;
                let reason =
                    RegisterReason::from_u8(payload[1]).ok_or(PacketError::InvalidField {
                        message_type,
                        field: "reason",
                        value: payload[1],
                    })?;
                Message::RegisterResponse {
                    success: read_flag(message_type, "success", payload[0])?,
                    reason,
                }
            }
            MessageType::QueueInfo => {
                require(message_type, payload, 2)?;
                Message::QueueInfo {
                    position: payload[0],
                    total: payload[1],
                }
            }
            MessageType::QueueUpdate => {
                require(message_type, payload, 2)?;
                Message::QueueUpdate {
                    position: payload[0],
                    total: payload[1],
                }
            }
            MessageType::ExitResponse => {
                require(message_type, payload, 1)?;
                Message::ExitResponse {
                    success: read_flag(message_type, "success", payload[0])?,
                }
            }
            MessageType::AdminMessage => {
                require(message_type, payload, 1)?;
                Message::AdminMessage {
                    text: read_text(message_type, payload, MAX_TEXT_LEN)?,
                }
            }
            MessageType::ChatMessage => match source {
                Role::Admin => {
                    require(message_type, payload, 2)?;
                    Message::Chat {
                        sender: Some(NodeId::new(payload[0])),
                        text: read_text(message_type, &payload[1..], MAX_TEXT_LEN)?,
                    }
                }
                Role::User => {
                    require(message_type, payload, 1)?;
                    Message::Chat {
                        sender: None,
                        text: read_text(message_type, payload, MAX_TEXT_LEN)?,
                    }
                }
            },
            MessageType::UserInfoRequest
            | MessageType::ConnectResponse
            | MessageType::QueueJoinRequest
            | MessageType::QueueReadyAck => {
                return Err(PacketError::ReservedMessageType { message_type })
            }
        };

        Ok(message)
    }
}

// ----------------------------------------------------------------------------
// Field Helpers
// ----------------------------------------------------------------------------

fn require(message_type: MessageType, payload: &[u8], expected: usize) -> Result<(), PacketError> {
    if payload.len() < expected {
        return Err(PacketError::PayloadTooShort {
            message_type,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn read_flag(message_type: MessageType, field: &'static str, value: u8) -> Result<bool, PacketError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(PacketError::InvalidField {
            message_type,
            field,
            value,
        }),
    }
}

fn read_text(message_type: MessageType, bytes: &[u8], max: usize) -> Result<String, PacketError> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(PacketError::UnterminatedString { message_type })?;
    if end > max {
        return Err(PacketError::TextTooLong {
            message_type,
            max,
            actual: end,
        });
    }
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Append `text` cut at its first NUL and at `max` bytes, plus the terminator
fn push_text(out: &mut Vec<u8>, text: &str, max: usize) {
    let text = text.split('\0').next().unwrap_or("");
    let mut end = text.len().min(max);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    out.extend_from_slice(&text.as_bytes()[..end]);
    out.push(0);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
