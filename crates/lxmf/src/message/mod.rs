//! The in-memory message model (spec §4.3): construction, the state
//! machine, representation selection, and the delivery-method-specific
//! packing variants (direct/opportunistic wire format, propagation
//! payload, and the supplemental paper/offline `lxm://` encoding).

pub mod payload;
pub mod wire;

use std::collections::BTreeMap;

use base64::Engine as _;
use rand_core::CryptoRngCore;
use reticulum::hash::AddressHash;
use reticulum::identity::{Identity, PrivateIdentity};
use sha2::{Digest, Sha256};

pub use payload::{FieldValue, Payload};
pub use wire::WireMessage;

use crate::constants::{
    LINK_PACKET_MAX_CONTENT, LXM_URI_PREFIX, STRUCT_OVERHEAD, TIMESTAMP_SIZE,
};
use crate::error::LxmfError;

/// Message lifecycle (spec §3). Initial `Generating`; terminal states are
/// `Delivered`, `Failed`, `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Generating,
    Outbound,
    Sending,
    Sent,
    Delivered,
    Failed,
    Rejected,
}

impl State {
    fn is_terminal(self) -> bool {
        matches!(self, State::Delivered | State::Failed | State::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Packet,
    Resource,
}

/// Which of the three delivery methods (plus the supplemental offline
/// variant) a message is destined for. `Paper` is never chosen by the
/// Delivery Engine automatically — only explicit construction requests it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
    Direct,
    Opportunistic,
    Propagated,
    Paper,
}

/// The recipient-encrypted propagation payload for a single message (spec
/// §6 "Propagation payload"), not yet wrapped in the outer `[now_f64,
/// [lxmf_data...]]` batch envelope — that wrapping is the Propagation
/// Client's job once it has a batch of these to send.
pub struct PropagationPayload {
    pub destination_hash: [u8; 16],
    pub transient_id: [u8; 32],
    ciphertext: Vec<u8>,
}

impl PropagationPayload {
    /// `destination_hash ‖ ciphertext`, with no stamp appended.
    pub fn lxmf_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.ciphertext.len());
        out.extend_from_slice(&self.destination_hash);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// `destination_hash ‖ ciphertext ‖ stamp`, once a propagation stamp has
    /// been generated over `transient_id` (spec §4.5 "Stamp requirement").
    /// `transient_id` itself never depends on the stamp (invariant 6).
    pub fn with_stamp(&self, stamp: [u8; 32]) -> Vec<u8> {
        let mut out = self.lxmf_data();
        out.extend_from_slice(&stamp);
        out
    }
}

pub struct Message {
    pub destination_hash: [u8; 16],
    pub source_hash: [u8; 16],
    pub timestamp: f64,
    pub title: Vec<u8>,
    pub content: Vec<u8>,
    pub fields: BTreeMap<i64, FieldValue>,
    pub desired_method: DeliveryMethod,
    pub stamp: Option<[u8; 32]>,
    pub state: State,
    pub representation: Option<Representation>,
    /// `None` until the source identity is recalled and verification is
    /// attempted; distinguishes "not yet checked" from "checked and bad"
    /// (spec §3 invariant 2).
    pub signature_validated: Option<bool>,
    hash: Option<[u8; 32]>,
    packed: Option<Vec<u8>>,
    signature: Option<[u8; 64]>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        destination_hash: [u8; 16],
        source_hash: [u8; 16],
        timestamp: f64,
        title: Vec<u8>,
        content: Vec<u8>,
        fields: BTreeMap<i64, FieldValue>,
        desired_method: DeliveryMethod,
    ) -> Self {
        Self {
            destination_hash,
            source_hash,
            timestamp,
            title,
            content,
            fields,
            desired_method,
            stamp: None,
            state: State::Generating,
            representation: None,
            signature_validated: None,
            hash: None,
            packed: None,
            signature: None,
        }
    }

    /// GENERATING → OUTBOUND → SENDING → {SENT, DELIVERED, FAILED,
    /// REJECTED}, plus the SENT → DELIVERED edge for a delivery
    /// confirmation arriving after a best-effort SENT (spec §4.3, Open
    /// Questions on OPPORTUNISTIC confirmation). Rejects every other edge,
    /// including any transition out of a terminal state.
    pub fn transition(&mut self, next: State) -> Result<(), LxmfError> {
        use State::*;
        let allowed = matches!(
            (self.state, next),
            (Generating, Outbound)
                | (Outbound, Sending)
                | (Outbound, Failed)
                | (Sending, Sent)
                | (Sending, Delivered)
                | (Sending, Failed)
                | (Sending, Rejected)
                | (Sent, Delivered)
        );
        if !allowed {
            return Err(LxmfError::StructuralDecode(format!(
                "invalid state transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn payload(&self) -> Payload {
        let mut payload = Payload::new(self.timestamp, self.title.clone(), self.content.clone());
        payload.fields = self.fields.clone();
        payload
    }

    /// Idempotent: populates `hash`, `packed`, `representation`, and the
    /// signature on first call; a `packed` message recomputes nothing on
    /// re-invocation (spec §3 invariant 1, §4.3).
    pub fn pack(&mut self, signer: &PrivateIdentity) -> Result<(), LxmfError> {
        if self.packed.is_some() {
            return Ok(());
        }
        let mut wire = WireMessage::new(self.destination_hash, self.source_hash, self.payload());
        wire.sign(signer)?;
        let hash = wire.hash()?;
        let packed_payload_len = wire.packed_payload_len()?;
        let packed = wire.pack()?;

        let content_size = packed_payload_len
            .checked_sub(TIMESTAMP_SIZE + STRUCT_OVERHEAD)
            .unwrap_or(0);
        self.representation = Some(if content_size <= LINK_PACKET_MAX_CONTENT {
            Representation::Packet
        } else {
            Representation::Resource
        });
        self.hash = Some(hash);
        self.signature = Some(packed[32..32 + 64].try_into().expect("signature is 64 bytes"));
        self.packed = Some(packed);
        Ok(())
    }

    pub fn hash(&self) -> Option<[u8; 32]> {
        self.hash
    }

    pub fn signature(&self) -> Option<[u8; 64]> {
        self.signature
    }

    /// The DIRECT/OPPORTUNISTIC wire bytes. `None` before `pack`.
    pub fn packed(&self) -> Option<&[u8]> {
        self.packed.as_deref()
    }

    pub fn verify(&self, identity: &Identity) -> Result<bool, LxmfError> {
        let packed = self.packed.as_deref().ok_or_else(|| {
            LxmfError::StructuralDecode("message has not been packed".into())
        })?;
        WireMessage::unpack(packed)?.verify(identity)
    }

    /// Reconstructs a `Message` from received wire bytes (spec §4.1 "Unpack
    /// contract"). `signature_validated` is left `None`; callers recall the
    /// source identity and call `verify` to populate it.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, LxmfError> {
        let wire = WireMessage::unpack(bytes)?;
        let hash = wire.hash()?;
        let mut msg = Self::create(
            wire.destination_hash,
            wire.source_hash,
            wire.payload.timestamp,
            wire.payload.title.clone(),
            wire.payload.content.clone(),
            wire.payload.fields.clone(),
            DeliveryMethod::Direct,
        );
        msg.hash = Some(hash);
        msg.signature = wire.signature;
        msg.packed = Some(bytes.to_vec());
        Ok(msg)
    }

    /// Encrypts the signed-and-packed message for `recipient`, in the shape
    /// the Propagation Client and the paper codec both build on (spec §3
    /// invariant 5, §4.3 "Propagated packing"). Requires a prior `pack()`.
    pub fn pack_for_propagation<R: CryptoRngCore + Copy>(
        &self,
        recipient: &Identity,
        rng: R,
    ) -> Result<PropagationPayload, LxmfError> {
        let packed = self
            .packed
            .as_deref()
            .ok_or_else(|| LxmfError::StructuralDecode("message has not been packed".into()))?;
        let without_destination = &packed[16..];
        let context = &self.destination_hash;
        let ciphertext =
            wire::encrypt_for_identity(recipient, context, without_destination, rng)?;
        let transient_id =
            Sha256::digest(&[self.destination_hash.as_slice(), ciphertext.as_slice()].concat());
        let mut transient_id_bytes = [0u8; 32];
        transient_id_bytes.copy_from_slice(&transient_id);
        Ok(PropagationPayload {
            destination_hash: self.destination_hash,
            transient_id: transient_id_bytes,
            ciphertext,
        })
    }

    /// Renders the message as a `lxm://`-prefixed, base64url, no-transport
    /// string: the same recipient-encrypted payload as
    /// `pack_for_propagation`, without a stamp (there is no node to demand
    /// one), meant to be carried out of band (printed, QR-coded, pasted).
    /// `DeliveryMethod::Paper` messages use this instead of any `Transport`
    /// call.
    pub fn pack_paper<R: CryptoRngCore + Copy>(
        &self,
        recipient: &Identity,
        rng: R,
    ) -> Result<String, LxmfError> {
        let payload = self.pack_for_propagation(recipient, rng)?;
        let encoded =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(payload.lxmf_data());
        Ok(format!("{LXM_URI_PREFIX}{encoded}"))
    }

    /// Inverse of `pack_paper`: recovers the destination hash and
    /// recipient-encrypted ciphertext. The caller still has to
    /// `decrypt_for_identity` and `WireMessage::unpack` the result — this
    /// function only peels off the URI framing.
    pub fn decode_lxm_uri(uri: &str) -> Result<(AddressHash, Vec<u8>), LxmfError> {
        let body = uri.strip_prefix(LXM_URI_PREFIX).ok_or_else(|| {
            LxmfError::StructuralDecode(format!("missing {LXM_URI_PREFIX} prefix"))
        })?;
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| LxmfError::StructuralDecode(e.to_string()))?;
        if raw.len() < 16 {
            return Err(LxmfError::StructuralDecode("lxm uri shorter than a destination hash".into()));
        }
        let mut destination_hash = [0u8; 16];
        destination_hash.copy_from_slice(&raw[..16]);
        Ok((AddressHash::from(destination_hash), raw[16..].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn signer() -> PrivateIdentity {
        PrivateIdentity::generate(&mut OsRng)
    }

    fn sample_message(content: Vec<u8>) -> Message {
        Message::create(
            [1; 16],
            [2; 16],
            1700000000.0,
            Vec::new(),
            content,
            BTreeMap::new(),
            DeliveryMethod::Direct,
        )
    }

    #[test]
    fn pack_is_idempotent() {
        let signer = signer();
        let mut msg = sample_message(b"hello".to_vec());
        msg.pack(&signer).unwrap();
        let first = msg.packed().unwrap().to_vec();
        msg.pack(&signer).unwrap();
        assert_eq!(msg.packed().unwrap(), first.as_slice());
    }

    #[test]
    fn representation_threshold_is_inclusive_on_packet_side() {
        let signer = signer();
        let mut at_threshold = sample_message(vec![b'X'; 319]);
        at_threshold.pack(&signer).unwrap();
        assert_eq!(at_threshold.representation, Some(Representation::Packet));

        let mut over_threshold = sample_message(vec![b'X'; 320]);
        over_threshold.pack(&signer).unwrap();
        assert_eq!(over_threshold.representation, Some(Representation::Resource));
    }

    #[test]
    fn state_machine_rejects_invalid_transitions() {
        let mut msg = sample_message(b"hi".to_vec());
        assert!(msg.transition(State::Sending).is_err());
        msg.transition(State::Outbound).unwrap();
        msg.transition(State::Sending).unwrap();
        msg.transition(State::Delivered).unwrap();
        assert!(msg.transition(State::Outbound).is_err());
    }

    #[test]
    fn sent_can_still_advance_to_delivered() {
        let mut msg = sample_message(b"hi".to_vec());
        msg.transition(State::Outbound).unwrap();
        msg.transition(State::Sending).unwrap();
        msg.transition(State::Sent).unwrap();
        msg.transition(State::Delivered).unwrap();
    }

    #[test]
    fn pack_for_propagation_transient_id_ignores_stamp() {
        let signer = signer();
        let recipient = PrivateIdentity::generate(&mut OsRng);
        let mut msg = sample_message(b"store and forward".to_vec());
        msg.pack(&signer).unwrap();
        let payload = msg.pack_for_propagation(&recipient.public(), OsRng).unwrap();
        let without_stamp = payload.lxmf_data();
        let with_stamp = payload.with_stamp([9u8; 32]);
        assert_eq!(&with_stamp[..without_stamp.len()], without_stamp.as_slice());
        // transient_id is computed once, independent of whether a stamp is later appended.
        let payload2 = msg.pack_for_propagation(&recipient.public(), OsRng).unwrap();
        assert_ne!(payload.transient_id.len(), 0);
        assert_eq!(payload2.transient_id.len(), 32);
    }

    #[test]
    fn paper_round_trips_through_lxm_uri() {
        let signer = signer();
        let recipient = PrivateIdentity::generate(&mut OsRng);
        let mut msg = sample_message(b"offline payload".to_vec());
        msg.pack(&signer).unwrap();
        let uri = msg.pack_paper(&recipient.public(), OsRng).unwrap();
        assert!(uri.starts_with(LXM_URI_PREFIX));

        let (destination_hash, ciphertext) = Message::decode_lxm_uri(&uri).unwrap();
        assert_eq!(destination_hash, AddressHash::from(msg.destination_hash));
        let plaintext =
            wire::decrypt_for_identity(&recipient, &msg.destination_hash, &ciphertext).unwrap();
        let recovered =
            WireMessage::unpack(&[destination_hash.as_slice(), &plaintext].concat()).unwrap();
        assert_eq!(recovered.payload.content, msg.content);
    }

    #[test]
    fn decode_lxm_uri_rejects_missing_prefix() {
        assert!(Message::decode_lxm_uri("not-a-paper-uri").is_err());
    }
}
