//! Propagation Client (spec §4.5): registry of known propagation nodes,
//! submission of PROPAGATED messages, and the sync/retrieval state machine.
//! Strictly client-side — there is no propagation-node *server* role in
//! this crate (spec.md §1 Non-goals).

use std::collections::BTreeMap;

use rand_core::CryptoRngCore;
use reticulum::contract::{Link, LinkEvent, Transport};
use reticulum::hash::AddressHash;
use reticulum::identity::{Identity, PrivateIdentity};
use rmpv::Value;

use crate::error::LxmfError;
use crate::message::{Message, State};
use crate::stamper::{self, CancellationToken};

/// A known propagation node (spec §4.5 "registry"). Owned by the Router in
/// a plain `BTreeMap`, mutex-free — a concurrent embedding wraps the whole
/// Router in its own lock (spec §5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationNodeRecord {
    pub destination_hash: [u8; 16],
    pub identity: Identity,
    pub display_name: Option<String>,
    pub stamp_cost: u32,
    pub stamp_cost_flexibility: u32,
    pub active: bool,
}

/// Sync/retrieval state machine (spec §4.5 table). `transition` mirrors
/// `Message::transition`'s explicit-edge style for consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    RequestingLink,
    LinkEstablished,
    RequestingList,
    Receiving,
    Complete,
    Failed,
    NoPath,
    NoLink,
}

impl SyncState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncState::Complete | SyncState::Failed | SyncState::NoPath | SyncState::NoLink
        )
    }

    pub fn transition(self, next: SyncState) -> Result<SyncState, LxmfError> {
        use SyncState::*;
        let allowed = matches!(
            (self, next),
            (Idle, RequestingLink)
                | (RequestingLink, LinkEstablished)
                | (RequestingLink, NoPath)
                | (RequestingLink, NoLink)
                | (LinkEstablished, RequestingList)
                | (RequestingList, Receiving)
                | (RequestingList, Complete)
                | (Receiving, Receiving)
                | (Receiving, Complete)
        ) || (!self.is_terminal() && next == Failed);
        if !allowed {
            return Err(LxmfError::StructuralDecode(format!(
                "invalid sync state transition {self:?} -> {next:?}"
            )));
        }
        Ok(next)
    }
}

/// Outcome of one submission attempt (spec §4.5 "Submission protocol").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    StampInsufficient,
}

/// Builds the propagation payload for `message`, generating a stamp over
/// `transient_id` first if `node.stamp_cost > 0` (spec §4.5 "Stamp
/// requirement": `expand_rounds = WORKBLOCK_EXPAND_ROUNDS_PN`, cost target
/// is the node's advertised `stamp_cost` exactly).
pub fn build_submission<R: CryptoRngCore + Copy>(
    message: &Message,
    node: &PropagationNodeRecord,
    rng: R,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, LxmfError> {
    let payload = message.pack_for_propagation(&node.identity, rng)?;
    if node.stamp_cost == 0 {
        return Ok(payload.lxmf_data());
    }
    log::debug!("generating propagation stamp at cost {} for node submission", node.stamp_cost);
    let workblock = stamper::stamp_workblock(
        &payload.transient_id,
        crate::constants::WORKBLOCK_EXPAND_ROUNDS_PN,
    );
    let mut rng_copy = rng;
    let stamp = stamper::generate_stamp(&workblock, node.stamp_cost, cancel, &mut rng_copy)
        .ok_or(LxmfError::TransferTimeout)?;
    Ok(payload.with_stamp(stamp))
}

/// Submits `message` to `node` over an established link: identifies the
/// sender, sends the built payload as a packet or resource depending on
/// size, and interprets the node's response events. On success transitions
/// `message` to SENT ("accepted into the node's store" per spec §4.5); on
/// an explicit stamp-insufficient signal, to REJECTED.
pub fn submit_to_node<L: Link>(
    link: &mut L,
    source_identity: &PrivateIdentity,
    message: &mut Message,
    built_payload: &[u8],
) -> Result<SubmissionOutcome, LxmfError> {
    link.identify(source_identity)?;
    message.transition(State::Sending)?;
    if built_payload.len() <= link.mdu() {
        link.send_packet(built_payload)?;
    } else {
        link.send_resource(built_payload)?;
    }

    for event in link.poll_events() {
        match event {
            LinkEvent::ErrorSignal(code) if code == crate::constants::PN_ERROR_INVALID_STAMP => {
                message.transition(State::Rejected)?;
                return Ok(SubmissionOutcome::StampInsufficient);
            }
            LinkEvent::PacketDelivered | LinkEvent::ResourceConcluded { success: true, .. } => {
                message.transition(State::Sent)?;
                return Ok(SubmissionOutcome::Accepted);
            }
            LinkEvent::ResourceConcluded { success: false, .. } | LinkEvent::Closed => {
                message.transition(State::Failed)?;
                return Err(LxmfError::LinkClosed);
            }
            _ => {}
        }
    }
    message.transition(State::Failed)?;
    Err(LxmfError::TransferTimeout)
}

/// msgpack-encodes a `/get` request (spec §6): `[wants|null, haves|null,
/// limit_kb|null]`. `(None, None, _)` lists all pending transient ids.
pub fn encode_get_request(
    wants: Option<&[[u8; 32]]>,
    haves: Option<&[[u8; 32]]>,
    limit_kb: Option<u32>,
) -> Vec<u8> {
    let to_value = |ids: Option<&[[u8; 32]]>| match ids {
        None => Value::Nil,
        Some(ids) => Value::Array(ids.iter().map(|id| Value::Binary(id.to_vec())).collect()),
    };
    let request = Value::Array(vec![
        to_value(wants),
        to_value(haves),
        limit_kb.map(Value::from).unwrap_or(Value::Nil),
    ]);
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &request).expect("in-memory write never fails");
    out
}

/// Encodes the node's response to a listing `/get` request: a plain
/// msgpack array of 32-byte transient ids. Used by propagation-node test
/// doubles (the server role itself is out of scope for this crate).
pub fn encode_transient_id_list(ids: &[[u8; 32]]) -> Vec<u8> {
    let array = Value::Array(ids.iter().map(|id| Value::Binary(id.to_vec())).collect());
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &array).expect("in-memory write never fails");
    out
}

pub fn decode_transient_id_list(bytes: &[u8]) -> Result<Vec<[u8; 32]>, LxmfError> {
    let value = rmpv::decode::read_value(&mut &bytes[..])
        .map_err(|e| LxmfError::StructuralDecode(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(LxmfError::StructuralDecode("transient id list is not an array".into()));
    };
    items
        .iter()
        .map(|v| {
            let bytes = v
                .as_slice()
                .ok_or_else(|| LxmfError::StructuralDecode("transient id is not binary".into()))?;
            let id: [u8; 32] = bytes
                .try_into()
                .map_err(|_| LxmfError::StructuralDecode("transient id is not 32 bytes".into()))?;
            Ok(id)
        })
        .collect()
}

/// Decodes a propagation wire batch (spec §6): `msgpack([now_f64,
/// [lxmf_data_0, lxmf_data_1, ...]])`.
pub fn decode_propagation_batch(bytes: &[u8]) -> Result<Vec<Vec<u8>>, LxmfError> {
    let value = rmpv::decode::read_value(&mut &bytes[..])
        .map_err(|e| LxmfError::StructuralDecode(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(LxmfError::StructuralDecode("propagation batch is not an array".into()));
    };
    if items.len() != 2 {
        return Err(LxmfError::StructuralDecode("propagation batch arity != 2".into()));
    }
    let Value::Array(entries) = &items[1] else {
        return Err(LxmfError::StructuralDecode("propagation batch entries is not an array".into()));
    };
    entries
        .iter()
        .map(|v| {
            v.as_slice()
                .map(|s| s.to_vec())
                .ok_or_else(|| LxmfError::StructuralDecode("lxmf_data entry is not binary".into()))
        })
        .collect()
}

/// Parses a propagation-node announce's application data (SPEC_FULL §4.5):
/// `[is_unpeered, timestamp, accepts_new, per_transfer_limit, per_sync_limit,
/// [stamp_cost, flexibility, peering_cost], metadata_map]`. Returns the
/// fields `add_propagation_node`/`set_active_propagation_node` need to
/// populate a [`PropagationNodeRecord`] without requiring out-of-band
/// configuration.
pub struct AnnouncedNodeInfo {
    pub accepts_new: bool,
    pub stamp_cost: u32,
    pub stamp_cost_flexibility: u32,
    pub display_name: Option<String>,
}

pub fn parse_propagation_node_app_data(app_data: &[u8]) -> Result<AnnouncedNodeInfo, LxmfError> {
    let value = rmpv::decode::read_value(&mut &app_data[..])
        .map_err(|e| LxmfError::StructuralDecode(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(LxmfError::StructuralDecode("announce app_data is not an array".into()));
    };
    if items.len() != 7 {
        return Err(LxmfError::StructuralDecode(format!(
            "announce app_data arity {} != 7",
            items.len()
        )));
    }
    let accepts_new = items[2].as_bool().unwrap_or(false);
    let Value::Array(cost_triple) = &items[5] else {
        return Err(LxmfError::StructuralDecode("announce cost field is not an array".into()));
    };
    if cost_triple.len() != 3 {
        return Err(LxmfError::StructuralDecode("announce cost triple arity != 3".into()));
    }
    let stamp_cost = cost_triple[0]
        .as_u64()
        .ok_or_else(|| LxmfError::StructuralDecode("stamp_cost is not an integer".into()))?
        as u32;
    let stamp_cost_flexibility = cost_triple[1]
        .as_u64()
        .ok_or_else(|| LxmfError::StructuralDecode("stamp_cost_flexibility is not an integer".into()))?
        as u32;
    let display_name = match &items[6] {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| k.as_u64() == Some(crate::constants::PN_META_NAME as u64))
            .and_then(|(_, v)| v.as_str().map(str::to_owned)),
        _ => None,
    };
    Ok(AnnouncedNodeInfo { accepts_new, stamp_cost, stamp_cost_flexibility, display_name })
}

/// Registry of known propagation nodes, owned by the Router. A plain
/// `BTreeMap` rather than a concurrent map — the host locks at the Router
/// boundary (spec §5 "protected by a single mutex" describes the
/// deployment, not a requirement baked into this type).
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<[u8; 16], PropagationNodeRecord>,
    active: Option<[u8; 16]>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: PropagationNodeRecord) {
        self.nodes.insert(node.destination_hash, node);
    }

    /// The most-recently-selected active node is used; others stay
    /// registered (spec §4.4 "Tie-breaks").
    pub fn set_active(&mut self, destination_hash: AddressHash) -> Result<(), LxmfError> {
        let key: [u8; 16] = destination_hash.into();
        if !self.nodes.contains_key(&key) {
            return Err(LxmfError::StructuralDecode(format!(
                "unknown propagation node {destination_hash}"
            )));
        }
        self.active = Some(key);
        Ok(())
    }

    pub fn active(&self) -> Option<&PropagationNodeRecord> {
        self.active.and_then(|key| self.nodes.get(&key))
    }

    pub fn get(&self, destination_hash: AddressHash) -> Option<&PropagationNodeRecord> {
        let key: [u8; 16] = destination_hash.into();
        self.nodes.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropagationNodeRecord> {
        self.nodes.values()
    }
}
