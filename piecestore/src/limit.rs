// Copyright (c) 2026 the storagenode authors
// Distributed under the terms of the Apache License, Version 2.0.
// See the LICENSE file for full terms.

use std::{convert::TryFrom, fmt, time::SystemTime};

use piece_crypto::{NodeId, PublicKey, Signature};

use crate::piece::PieceId;

/// An uplink- or system-generated random identifier for one session's worth
/// of orders, unique within its order-expiration window (spec.md §3 "Used
/// Serial Entry").
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SerialNumber([u8; 16]);

impl From<[u8; 16]> for SerialNumber {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for SerialNumber {
    type Error = InvalidSerialNumber;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| InvalidSerialNumber)?;
        Ok(Self(arr))
    }
}

impl SerialNumber {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({})", multibase::encode(multibase::Base::Base32Z, self.0))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid serial number")]
pub struct InvalidSerialNumber;

/// The action an order limit authorizes, and which RPC handler may accept
/// it (spec.md §3, §4.1 "the action matches the RPC handler").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Put,
    PutRepair,
    Get,
    GetRepair,
    GetAudit,
    Delete,
}

impl Action {
    pub fn is_upload(self) -> bool {
        matches!(self, Self::Put | Self::PutRepair)
    }

    pub fn is_download(self) -> bool {
        matches!(self, Self::Get | Self::GetRepair | Self::GetAudit)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Put => "PUT",
            Self::PutRepair => "PUT_REPAIR",
            Self::Get => "GET",
            Self::GetRepair => "GET_REPAIR",
            Self::GetAudit => "GET_AUDIT",
            Self::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A coordinator-signed envelope authorizing one operation on one piece
/// (spec.md §3 "Order Limit").
#[derive(Clone, Debug)]
pub struct OrderLimit {
    pub coordinator_id: NodeId,
    pub uplink_public_key: PublicKey,
    pub storage_node_id: NodeId,
    pub piece_id: PieceId,
    pub action: Action,
    pub limit: u64,
    pub serial_number: SerialNumber,
    pub order_creation: SystemTime,
    pub piece_expiration: Option<SystemTime>,
    pub order_expiration: SystemTime,
    pub coordinator_signature: Signature,
}

impl OrderLimit {
    /// The bytes the coordinator signs over. Field order is fixed and part
    /// of the wire contract; callers must not reorder it without bumping a
    /// protocol version (out of scope here -- framing is a transport
    /// concern).
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(self.coordinator_id.as_bytes());
        buf.extend_from_slice(self.uplink_public_key.as_bytes());
        buf.extend_from_slice(self.storage_node_id.as_bytes());
        buf.extend_from_slice(self.piece_id.as_bytes());
        buf.push(action_tag(self.action));
        buf.extend_from_slice(&self.limit.to_be_bytes());
        buf.extend_from_slice(self.serial_number.as_bytes());
        buf.extend_from_slice(&system_time_secs(self.order_creation).to_be_bytes());
        buf.extend_from_slice(&self.piece_expiration.map(system_time_secs).unwrap_or(0).to_be_bytes());
        buf.extend_from_slice(&system_time_secs(self.order_expiration).to_be_bytes());
        buf
    }
}

fn action_tag(a: Action) -> u8 {
    match a {
        Action::Put => 0,
        Action::PutRepair => 1,
        Action::Get => 2,
        Action::GetRepair => 3,
        Action::GetAudit => 4,
        Action::Delete => 5,
    }
}

fn system_time_secs(t: SystemTime) -> i64 {
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// An uplink-signed incremental bandwidth claim within a single session
/// (spec.md §3 "Order").
#[derive(Clone, Debug)]
pub struct Order {
    pub serial_number: SerialNumber,
    pub amount: u64,
    pub order_creation: SystemTime,
    pub uplink_signature: Signature,
}

impl Order {
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(self.serial_number.as_bytes());
        buf.extend_from_slice(&self.amount.to_be_bytes());
        buf
    }
}
