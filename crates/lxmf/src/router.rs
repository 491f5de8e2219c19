//! Router (spec §4.6): the public facade — registers delivery identities
//! and callbacks, is the outbound entry point, and drives the inbound
//! intake path and the propagation sync state machine. Owns no lock itself
//! (spec §5: a concurrent embedding wraps the whole `Router` in its own
//! mutex rather than this crate baking one in).

use rand_core::CryptoRngCore;
use reticulum::contract::{Link, LinkEvent, Transport, TransportError};
use reticulum::hash::AddressHash;
use reticulum::identity::PrivateIdentity;

use crate::config::RouterConfig;
use crate::delivery;
use crate::error::LxmfError;
use crate::message::{wire, DeliveryMethod, Message, State};
use crate::propagation::{self, NodeRegistry, PropagationNodeRecord, SubmissionOutcome, SyncState};
use crate::stamper::CancellationToken;

/// Outbound/inbound/propagation counters (spec §4.6 implementation note).
/// Queried by the host; never persisted by this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouterStats {
    pub outbound_enqueued: u64,
    pub outbound_delivered: u64,
    pub outbound_failed: u64,
    pub inbound_accepted: u64,
    pub inbound_rejected: u64,
    pub propagation_ingested: u64,
    pub propagation_requests: u64,
    pub propagation_completed: u64,
    pub propagation_cancelled: u64,
}

pub struct Router<T: Transport> {
    transport: T,
    config: RouterConfig,
    delivery_identity: Option<PrivateIdentity>,
    delivery_destination: Option<AddressHash>,
    delivery_callback: Option<Box<dyn FnMut(Message)>>,
    nodes: NodeRegistry,
    sync_state: SyncState,
    sync_link: Option<T::Link>,
    last_sync_count: usize,
    stats: RouterStats,
}

impl<T: Transport> Router<T> {
    pub fn new(transport: T, config: RouterConfig) -> Self {
        Self {
            transport,
            config,
            delivery_identity: None,
            delivery_destination: None,
            delivery_callback: None,
            nodes: NodeRegistry::new(),
            sync_state: SyncState::Idle,
            sync_link: None,
            last_sync_count: 0,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Exposed so a host driving OPPORTUNISTIC retries itself (spec §4.4's
    /// bounded-attempt policy is caller-driven — this crate owns no
    /// runtime to sleep in) can read the attempt count and backoff bounds.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Creates the canonical `lxmf/delivery` destination for `identity` and
    /// registers it with the transport (spec §4.6).
    pub fn register_delivery_identity(&mut self, identity: PrivateIdentity) -> AddressHash {
        let destination_hash =
            reticulum::hash::destination_hash("lxmf.delivery", &identity.public().hash());
        self.transport.register_identity(destination_hash, identity.public());
        self.delivery_destination = Some(destination_hash);
        self.delivery_identity = Some(identity);
        destination_hash
    }

    pub fn delivery_destination(&self) -> Option<AddressHash> {
        self.delivery_destination
    }

    /// The single callback invoked with a fully-unpacked message on inbound
    /// delivery (spec §4.6) — both direct/opportunistic unpack and
    /// propagation-sync ingestion route through it.
    pub fn register_delivery_callback<F: FnMut(Message) + 'static>(&mut self, callback: F) {
        self.delivery_callback = Some(Box::new(callback));
    }

    fn signer(&self) -> Result<&PrivateIdentity, LxmfError> {
        self.delivery_identity
            .as_ref()
            .ok_or_else(|| LxmfError::StructuralDecode("no delivery identity registered".into()))
    }

    /// Dispatch entry point (spec §4.4). Packs the message if needed, then
    /// branches by `desired_method`. DIRECT returns a live link for the
    /// caller to drain with [`Router::poll_direct`]; OPPORTUNISTIC and
    /// PROPAGATED resolve synchronously against this transport and return
    /// `None`.
    pub fn handle_outbound<R: CryptoRngCore + Copy>(
        &mut self,
        message: &mut Message,
        rng: R,
    ) -> Result<Option<T::Link>, LxmfError> {
        message.pack(self.signer()?)?;
        self.stats.outbound_enqueued += 1;
        log::debug!(
            "handle_outbound: destination={} method={:?}",
            AddressHash::from(message.destination_hash),
            message.desired_method
        );

        match message.desired_method {
            DeliveryMethod::Direct => {
                let link = delivery::dispatch_direct(&self.transport, message)?;
                Ok(Some(link))
            }
            DeliveryMethod::Opportunistic => {
                match delivery::dispatch_opportunistic(&self.transport, message, rng) {
                    Ok(()) => {
                        self.stats.outbound_delivered += 1;
                        Ok(None)
                    }
                    Err(err) => {
                        self.stats.outbound_failed += 1;
                        log::warn!("opportunistic dispatch failed: {err}");
                        Err(err)
                    }
                }
            }
            DeliveryMethod::Propagated => {
                let node = self
                    .nodes
                    .active()
                    .cloned()
                    .ok_or_else(|| LxmfError::StructuralDecode("no active propagation node".into()))?;
                message.transition(State::Outbound)?;
                let cancel = CancellationToken::new();
                let built = propagation::build_submission(message, &node, rng, &cancel)?;
                let mut link = self
                    .transport
                    .open_link(AddressHash::from(node.destination_hash))
                    .map_err(LxmfError::from)?;
                let outcome = {
                    let signer = self.signer()?;
                    propagation::submit_to_node(&mut link, signer, message, &built)
                };
                match outcome {
                    Ok(SubmissionOutcome::Accepted) => {
                        self.stats.outbound_delivered += 1;
                        Ok(None)
                    }
                    Ok(SubmissionOutcome::StampInsufficient) => {
                        self.stats.outbound_failed += 1;
                        log::warn!(
                            "propagation node {} rejected stamp for message",
                            AddressHash::from(node.destination_hash)
                        );
                        Ok(None)
                    }
                    Err(err) => {
                        self.stats.outbound_failed += 1;
                        log::warn!("propagation submission failed: {err}");
                        Err(err)
                    }
                }
            }
            DeliveryMethod::Paper => Err(LxmfError::StructuralDecode(
                "paper delivery is not dispatched through handle_outbound".into(),
            )),
        }
    }

    /// Drains a live DIRECT delivery's link events, applying them to
    /// `message`'s state machine. Returns `true` once a terminal state is
    /// reached.
    pub fn poll_direct(&mut self, link: &mut T::Link, message: &mut Message) -> Result<bool, LxmfError> {
        let mut finished = false;
        for event in link.poll_events() {
            if delivery::apply_direct_event(message, &event)? {
                finished = true;
            }
        }
        if finished {
            match message.state {
                State::Delivered | State::Sent => self.stats.outbound_delivered += 1,
                State::Failed | State::Rejected => self.stats.outbound_failed += 1,
                _ => {}
            }
        }
        Ok(finished)
    }

    /// Symmetric counterpart to `delivery::dispatch_opportunistic`'s
    /// destination encryption: an OPPORTUNISTIC packet arrives encrypted
    /// for this router's delivery identity rather than as plain wire bytes,
    /// so it is decrypted here before being handed to the normal intake
    /// path (spec §4.4 "OPPORTUNISTIC").
    pub fn handle_inbound_opportunistic(&mut self, ciphertext: &[u8]) -> Result<(), LxmfError> {
        let identity = self.delivery_identity.as_ref().ok_or_else(|| {
            LxmfError::StructuralDecode("no delivery identity registered".into())
        })?;
        let destination_hash = self.delivery_destination.ok_or_else(|| {
            LxmfError::StructuralDecode("no delivery destination registered".into())
        })?;
        let context: [u8; 16] = destination_hash.into();
        let plaintext = wire::decrypt_for_identity(identity, &context, ciphertext)?;
        self.handle_inbound(&plaintext)
    }

    /// Router intake (spec §2 data flow): unpacks, verifies against the
    /// recalled source identity if known, and hands the message to the
    /// delivery callback. An unknown source identity is not an error — the
    /// message is delivered with `signature_validated = Some(false)` and
    /// policy is left to the application (spec §3 invariant 2, §7).
    pub fn handle_inbound(&mut self, bytes: &[u8]) -> Result<(), LxmfError> {
        let mut message = Message::from_wire(bytes)?;
        let source_hash = AddressHash::from(message.source_hash);
        match self.transport.recall_identity(source_hash) {
            Some(identity) => {
                let valid = message.verify(&identity)?;
                message.signature_validated = Some(valid);
                if !valid {
                    self.stats.inbound_rejected += 1;
                    log::warn!(
                        "inbound message from {source_hash} failed signature verification, discarding"
                    );
                    return Err(LxmfError::SignatureInvalid);
                }
            }
            None => {
                log::debug!("inbound message from unknown source {source_hash}, delivering unvalidated");
                message.signature_validated = Some(false);
            }
        }
        self.stats.inbound_accepted += 1;
        if let Some(cb) = self.delivery_callback.as_mut() {
            cb(message);
        }
        Ok(())
    }

    pub fn add_propagation_node(&mut self, node: PropagationNodeRecord) {
        self.nodes.add(node);
    }

    pub fn set_active_propagation_node(&mut self, destination_hash: AddressHash) -> Result<(), LxmfError> {
        self.nodes.set_active(destination_hash)
    }

    pub fn propagation_transfer_state(&self) -> SyncState {
        self.sync_state
    }

    pub fn propagation_transfer_last_result(&self) -> usize {
        self.last_sync_count
    }

    /// The live link backing an in-progress sync, if any. Exposed mainly so
    /// tests and hosts with lower-level transport access can inspect the
    /// underlying link (e.g. to drive a test double standing in for the
    /// propagation node on the other end).
    pub fn sync_link(&self) -> Option<&T::Link> {
        self.sync_link.as_ref()
    }

    /// IDLE → REQUESTING_LINK → LINK_ESTABLISHED → REQUESTING_LIST (spec
    /// §4.5 table). Leaves a live link in `self.sync_link` for
    /// [`Router::poll_sync`] to drain the rest of the state machine.
    pub fn request_messages_from_propagation_node(&mut self) -> Result<(), LxmfError> {
        let node = self
            .nodes
            .active()
            .cloned()
            .ok_or_else(|| LxmfError::StructuralDecode("no active propagation node".into()))?;
        // A prior sync may have left the state machine in a terminal state
        // (COMPLETE/FAILED/NO_PATH/NO_LINK); a new request always starts a
        // fresh round rather than trying to resume from wherever the last
        // one ended (spec §4.5: "a subsequent sync returns an empty list").
        if self.sync_state.is_terminal() {
            self.sync_state = SyncState::Idle;
        }
        self.sync_state = self.sync_state.transition(SyncState::RequestingLink)?;
        self.stats.propagation_requests += 1;

        let link = match self.transport.open_link(AddressHash::from(node.destination_hash)) {
            Ok(link) => link,
            Err(TransportError::NoPath(_)) => {
                self.sync_state = self.sync_state.transition(SyncState::NoPath)?;
                log::warn!("propagation sync: no path to node {}", AddressHash::from(node.destination_hash));
                return Err(LxmfError::LinkEstablishmentFailed("no path".into()));
            }
            Err(TransportError::LinkTimeout) => {
                self.sync_state = self.sync_state.transition(SyncState::NoLink)?;
                log::warn!("propagation sync: link to node {} timed out", AddressHash::from(node.destination_hash));
                return Err(LxmfError::LinkEstablishmentFailed("timed out".into()));
            }
            Err(err) => {
                self.sync_state = self.sync_state.transition(SyncState::NoLink)?;
                return Err(err.into());
            }
        };
        self.sync_state = self.sync_state.transition(SyncState::LinkEstablished)?;

        let mut link = link;
        if let Some(identity) = self.delivery_identity.as_ref() {
            link.identify(identity).map_err(LxmfError::from)?;
        }
        self.sync_state = self.sync_state.transition(SyncState::RequestingList)?;
        link.send_packet(&propagation::encode_get_request(None, None, None))
            .map_err(LxmfError::from)?;
        self.sync_link = Some(link);
        self.last_sync_count = 0;
        Ok(())
    }

    /// Drives the rest of the sync state machine: the transient-id listing
    /// response, the follow-up `/get` for specific ids, and the final
    /// batch decrypt/ingest (spec §4.5 "Inbound decryption"). Returns
    /// `true` once COMPLETE or FAILED.
    pub fn poll_sync(&mut self) -> Result<bool, LxmfError> {
        let Some(mut link) = self.sync_link.take() else { return Ok(true) };
        let mut finished = false;

        for event in link.poll_events() {
            match event {
                LinkEvent::PacketReceived(data) => match self.sync_state {
                    SyncState::RequestingList => {
                        let ids = propagation::decode_transient_id_list(&data)?;
                        if ids.is_empty() {
                            self.sync_state = self.sync_state.transition(SyncState::Complete)?;
                            self.last_sync_count = 0;
                            finished = true;
                        } else {
                            self.sync_state = self.sync_state.transition(SyncState::Receiving)?;
                            let get_specific = propagation::encode_get_request(Some(&ids), None, None);
                            link.send_packet(&get_specific).map_err(LxmfError::from)?;
                        }
                    }
                    SyncState::Receiving => {
                        let batch = propagation::decode_propagation_batch(&data)?;
                        self.last_sync_count = self.ingest_propagation_batch(&batch)?;
                        self.sync_state = self.sync_state.transition(SyncState::Complete)?;
                        finished = true;
                    }
                    _ => {}
                },
                LinkEvent::Closed | LinkEvent::ErrorSignal(_) => {
                    self.sync_state = self.sync_state.transition(SyncState::Failed)?;
                    finished = true;
                }
                _ => {}
            }
        }

        if finished {
            match self.sync_state {
                SyncState::Complete => {
                    self.stats.propagation_completed += 1;
                    log::debug!("propagation sync complete: {} message(s)", self.last_sync_count);
                }
                SyncState::Failed => {
                    self.stats.propagation_cancelled += 1;
                    log::warn!("propagation sync failed before completion");
                }
                _ => {}
            }
        } else {
            self.sync_link = Some(link);
        }
        Ok(finished)
    }

    /// Cancels an in-flight sync, leaving already-delivered messages intact
    /// (spec §5 "Cancellation").
    pub fn cancel_sync(&mut self) {
        if let Some(mut link) = self.sync_link.take() {
            link.close();
        }
        if !self.sync_state.is_terminal() {
            self.sync_state = SyncState::Failed;
            self.stats.propagation_cancelled += 1;
        }
    }

    fn ingest_propagation_batch(&mut self, batch: &[Vec<u8>]) -> Result<usize, LxmfError> {
        let identity = self
            .delivery_identity
            .as_ref()
            .ok_or_else(|| LxmfError::StructuralDecode("no delivery identity registered".into()))?;
        let mut count = 0;
        for lxmf_data in batch {
            if lxmf_data.len() < 16 {
                continue;
            }
            let (destination_hash, ciphertext) = lxmf_data.split_at(16);
            let plaintext = wire::decrypt_for_identity(identity, destination_hash, ciphertext)?;
            let mut full = destination_hash.to_vec();
            full.extend_from_slice(&plaintext);
            let message = Message::from_wire(&full)?;
            self.stats.propagation_ingested += 1;
            count += 1;
            if let Some(cb) = self.delivery_callback.as_mut() {
                cb(message);
            }
        }
        Ok(count)
    }
}
