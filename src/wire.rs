//! Wire codec: explicit byte encoding for every message type.
//!
//! The engines' message structs (`HeartbeatMessage`, `DiscoveryMessage`,
//! ...) are logical shapes, not wire layouts — no `#[repr(C)]`, no
//! `#[repr(packed)]`. Encoding is this module's job, field by field, with
//! `to_le_bytes`/`from_le_bytes`, so the byte layout is stable across
//! compilers/targets regardless of struct field order or alignment.

use crate::consensus::{InhibitMessage, ProposalMessage, ProposalType, VoteMessage};
use crate::fixedpoint::Fixed;
use crate::hal::MsgType;
use crate::heartbeat::HeartbeatMessage;
use crate::mac::Mac;
use crate::topology::DiscoveryMessage;
use crate::types::*;

/// Wire-encoded heartbeat: 8 bytes.
pub const HEARTBEAT_WIRE_LEN: usize = 8;
/// Wire-encoded discovery: 14 bytes.
pub const DISCOVERY_WIRE_LEN: usize = 14;
/// Wire-encoded field update: 29 bytes (header + 6 Q16.16 components).
pub const FIELD_WIRE_LEN: usize = 3 + 2 + FIELD_COUNT * 4;
/// Wire-encoded proposal: 12 bytes.
pub const PROPOSAL_WIRE_LEN: usize = 12;
/// Wire-encoded vote: 5 bytes.
pub const VOTE_WIRE_LEN: usize = 5;
/// Wire-encoded inhibit: 4 bytes.
pub const INHIBIT_WIRE_LEN: usize = 4;

pub fn encode_heartbeat(msg: &HeartbeatMessage) -> [u8; HEARTBEAT_WIRE_LEN] {
    [
        msg.sender_id,
        msg.sequence,
        msg.state as u8,
        msg.neighbor_count,
        msg.load_percent,
        msg.thermal_percent,
        msg.echo_sequence,
        msg.flags,
    ]
}

pub fn decode_heartbeat(bytes: &[u8]) -> Result<HeartbeatMessage> {
    if bytes.len() < HEARTBEAT_WIRE_LEN {
        return Err(Error::InvalidArg);
    }
    Ok(HeartbeatMessage {
        sender_id: bytes[0],
        sequence: bytes[1],
        state: decode_module_state(bytes[2])?,
        neighbor_count: bytes[3],
        load_percent: bytes[4],
        thermal_percent: bytes[5],
        echo_sequence: bytes[6],
        flags: bytes[7],
    })
}

pub fn encode_discovery(msg: &DiscoveryMessage) -> [u8; DISCOVERY_WIRE_LEN] {
    let mut out = [0u8; DISCOVERY_WIRE_LEN];
    out[0] = msg.sender_id;
    out[1..3].copy_from_slice(&msg.position.x.to_le_bytes());
    out[3..5].copy_from_slice(&msg.position.y.to_le_bytes());
    out[5..7].copy_from_slice(&msg.position.z.to_le_bytes());
    out[7] = msg.neighbor_count;
    out[8..10].copy_from_slice(&msg.capabilities.to_le_bytes());
    out[10..12].copy_from_slice(&msg.sequence.to_le_bytes());
    out
}

pub fn decode_discovery(bytes: &[u8]) -> Result<DiscoveryMessage> {
    if bytes.len() < DISCOVERY_WIRE_LEN {
        return Err(Error::InvalidArg);
    }
    Ok(DiscoveryMessage {
        sender_id: bytes[0],
        position: Position::new(
            i16::from_le_bytes([bytes[1], bytes[2]]),
            i16::from_le_bytes([bytes[3], bytes[4]]),
            i16::from_le_bytes([bytes[5], bytes[6]]),
        ),
        neighbor_count: bytes[7],
        capabilities: u16::from_le_bytes([bytes[8], bytes[9]]),
        sequence: u16::from_le_bytes([bytes[10], bytes[11]]),
    })
}

/// Encode a published field: source id, sequence, then every component as
/// a little-endian Q16.16 word.
pub fn encode_field(field: &Field) -> [u8; FIELD_WIRE_LEN] {
    let mut out = [0u8; FIELD_WIRE_LEN];
    out[0] = field.source;
    out[1] = field.sequence;
    for (i, component) in field.components.iter().enumerate() {
        let offset = 2 + i * 4;
        out[offset..offset + 4].copy_from_slice(&component.to_bits().to_le_bytes());
    }
    out
}

pub fn decode_field(bytes: &[u8], now: TimeUs) -> Result<Field> {
    if bytes.len() < FIELD_WIRE_LEN {
        return Err(Error::InvalidArg);
    }
    let mut components = [Fixed::ZERO; FIELD_COUNT];
    for (i, component) in components.iter_mut().enumerate() {
        let offset = 2 + i * 4;
        let bits = i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        *component = Fixed::from_bits(bits);
    }
    Ok(Field {
        components,
        timestamp: now,
        source: bytes[0],
        sequence: bytes[1],
    })
}

pub fn encode_proposal(msg: &ProposalMessage) -> [u8; PROPOSAL_WIRE_LEN] {
    let mut out = [0u8; PROPOSAL_WIRE_LEN];
    out[0] = msg.proposer_id;
    out[1..3].copy_from_slice(&msg.ballot_id.to_le_bytes());
    out[3] = msg.proposal_type as u8;
    out[4..8].copy_from_slice(&msg.data.to_le_bytes());
    out[8..12].copy_from_slice(&msg.threshold.to_bits().to_le_bytes());
    out
}

pub fn decode_proposal(bytes: &[u8]) -> Result<ProposalMessage> {
    if bytes.len() < PROPOSAL_WIRE_LEN {
        return Err(Error::InvalidArg);
    }
    Ok(ProposalMessage {
        proposer_id: bytes[0],
        ballot_id: u16::from_le_bytes([bytes[1], bytes[2]]),
        proposal_type: decode_proposal_type(bytes[3])?,
        data: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        threshold: Fixed::from_bits(i32::from_le_bytes(bytes[8..12].try_into().unwrap())),
    })
}

pub fn encode_vote(msg: &VoteMessage) -> [u8; VOTE_WIRE_LEN] {
    [
        msg.voter_id,
        msg.proposer,
        (msg.ballot_id & 0xFF) as u8,
        (msg.ballot_id >> 8) as u8,
        msg.vote as u8,
    ]
}

pub fn decode_vote(bytes: &[u8]) -> Result<VoteMessage> {
    if bytes.len() < VOTE_WIRE_LEN {
        return Err(Error::InvalidArg);
    }
    Ok(VoteMessage {
        voter_id: bytes[0],
        proposer: bytes[1],
        ballot_id: u16::from_le_bytes([bytes[2], bytes[3]]),
        vote: decode_vote_value(bytes[4])?,
    })
}

pub fn encode_inhibit(msg: &InhibitMessage) -> [u8; INHIBIT_WIRE_LEN] {
    [msg.sender_id, msg.proposer, (msg.ballot_id & 0xFF) as u8, (msg.ballot_id >> 8) as u8]
}

pub fn decode_inhibit(bytes: &[u8]) -> Result<InhibitMessage> {
    if bytes.len() < INHIBIT_WIRE_LEN {
        return Err(Error::InvalidArg);
    }
    Ok(InhibitMessage {
        sender_id: bytes[0],
        proposer: bytes[1],
        ballot_id: u16::from_le_bytes([bytes[2], bytes[3]]),
    })
}

/// Longest payload any message type in this module encodes to, before a
/// trailing auth tag is appended. Drives the scratch buffer size below.
const MAX_PAYLOAD_LEN: usize = FIELD_WIRE_LEN;

/// Length of the trailing authentication tag appended to a wire message,
/// per §6: 8 or 16 bytes over (sender, type, payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLen {
    Short8 = 8,
    Long16 = 16,
}

/// Which message types require a trailing MAC tag, and at what length.
/// Vote/proposal/inhibit are required by default since those are the
/// messages a forged sender could use to force an outcome.
#[derive(Debug, Clone, Copy)]
pub struct AuthPolicy {
    required: u16,
    pub tag_len: TagLen,
}

impl AuthPolicy {
    pub const fn none() -> Self {
        Self { required: 0, tag_len: TagLen::Short8 }
    }

    /// Application message types (`MsgType::UserBase` and above) never
    /// carry a core-managed tag requirement; this is a no-op for them.
    pub fn require(mut self, msg_type: MsgType) -> Self {
        let bit = msg_type as u8;
        if bit < 16 {
            self.required |= 1 << bit;
        }
        self
    }

    pub fn requires(&self, msg_type: MsgType) -> bool {
        let bit = msg_type as u8;
        bit < 16 && self.required & (1 << bit) != 0
    }
}

impl Default for AuthPolicy {
    /// Vote, Proposal and Inhibit carry an 8-byte tag; everything else is
    /// unauthenticated.
    fn default() -> Self {
        Self::none()
            .require(MsgType::Vote)
            .require(MsgType::Proposal)
            .require(MsgType::Inhibit)
    }
}

fn tag_input(sender: ModuleId, msg_type: MsgType, payload: &[u8]) -> heapless::Vec<u8, { 2 + MAX_PAYLOAD_LEN }> {
    let mut input = heapless::Vec::new();
    input.push(sender).ok();
    input.push(msg_type as u8).ok();
    input.extend_from_slice(payload).ok();
    input
}

/// Appends a trailing auth tag to an already-encoded message sitting in
/// `buf[..payload_len]`. `buf` must have room for `payload_len + tag_len`
/// bytes. Returns the total encoded length including the tag.
pub fn append_auth_tag(
    buf: &mut [u8],
    payload_len: usize,
    sender: ModuleId,
    msg_type: MsgType,
    mac: &dyn Mac,
    tag_len: TagLen,
) -> Result<usize> {
    let n = tag_len as usize;
    if buf.len() < payload_len + n {
        return Err(Error::InvalidArg);
    }
    let tag = mac.compute(&tag_input(sender, msg_type, &buf[..payload_len]));
    buf[payload_len..payload_len + n].copy_from_slice(&tag[..n]);
    Ok(payload_len + n)
}

/// Verifies a trailing auth tag over `buf[..payload_len]`, in constant
/// time with respect to the tag bytes. `buf` must hold at least
/// `payload_len + tag_len` bytes.
pub fn verify_auth_tag(
    buf: &[u8],
    payload_len: usize,
    sender: ModuleId,
    msg_type: MsgType,
    mac: &dyn Mac,
    tag_len: TagLen,
) -> bool {
    let n = tag_len as usize;
    if buf.len() < payload_len + n {
        return false;
    }
    let expected = mac.compute(&tag_input(sender, msg_type, &buf[..payload_len]));
    let mut diff = 0u8;
    for i in 0..n {
        diff |= expected[i] ^ buf[payload_len + i];
    }
    diff == 0
}

fn decode_module_state(byte: u8) -> Result<ModuleState> {
    Ok(match byte {
        0 => ModuleState::Init,
        1 => ModuleState::Discovering,
        2 => ModuleState::Active,
        3 => ModuleState::Degraded,
        4 => ModuleState::Isolated,
        5 => ModuleState::Reforming,
        6 => ModuleState::Shutdown,
        _ => return Err(Error::InvalidArg),
    })
}

fn decode_proposal_type(byte: u8) -> Result<ProposalType> {
    Ok(match byte {
        0 => ProposalType::ModeChange,
        1 => ProposalType::PowerLimit,
        2 => ProposalType::Shutdown,
        3 => ProposalType::Reformation,
        16 => ProposalType::Custom0,
        17 => ProposalType::Custom1,
        18 => ProposalType::Custom2,
        19 => ProposalType::Custom3,
        _ => return Err(Error::InvalidArg),
    })
}

fn decode_vote_value(byte: u8) -> Result<VoteValue> {
    Ok(match byte {
        0 => VoteValue::Abstain,
        1 => VoteValue::Yes,
        2 => VoteValue::No,
        3 => VoteValue::Inhibit,
        _ => return Err(Error::InvalidArg),
    })
}
