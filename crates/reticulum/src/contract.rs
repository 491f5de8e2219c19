//! Contract consumed by `lxmf`'s Delivery Engine and Propagation Client.
//!
//! A real transport (link establishment, path discovery, encrypted packets,
//! resource chunking) lives outside this crate's scope; this module only
//! names the shape `lxmf` needs. `testing::InMemoryTransport` is a
//! reference implementation used by this crate's own tests and by `lxmf`'s
//! integration tests.

use thiserror::Error;

use crate::hash::AddressHash;
use crate::identity::Identity;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no path known to destination {0}")]
    NoPath(AddressHash),
    #[error("link establishment timed out")]
    LinkTimeout,
    #[error("link is closed")]
    LinkClosed,
    #[error("resource transfer failed: {0}")]
    ResourceFailed(String),
    #[error("payload exceeds link MDU ({0} > {1})")]
    ExceedsMdu(usize, usize),
    #[error("destination identity unknown: {0}")]
    UnknownIdentity(AddressHash),
}

/// An in-flight chunked transfer handle. The transport reports completion
/// via `LinkEvent::ResourceConcluded` carrying the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u64);

/// Edge-triggered events a link surfaces. The Delivery Engine and
/// Propagation Client poll these rather than registering nested callbacks
/// (see spec Design Notes on "deep callback nesting").
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Established,
    Closed,
    /// A proof was received for a single-packet send.
    PacketDelivered,
    /// A full application payload arrived over this link.
    PacketReceived(Vec<u8>),
    ResourceStarted(ResourceHandle),
    ResourceConcluded { handle: ResourceHandle, success: bool },
    /// A propagation-node error signal packet (spec.md §6, e.g. 0xF0/0xF5).
    ErrorSignal(u8),
}

/// A single logical link to a destination. Per spec §5, a link is
/// logically single-threaded: callers are expected to serialize calls to a
/// given `Link` themselves (the contract does not require `Send`/`Sync`).
pub trait Link {
    fn destination_hash(&self) -> AddressHash;
    fn mdu(&self) -> usize;
    fn is_established(&self) -> bool;

    /// Reveals the initiator's identity over an already-established link
    /// (required before a propagation node will answer authenticated
    /// requests; spec.md §4.5).
    fn identify(&mut self, identity: &crate::identity::PrivateIdentity) -> Result<(), TransportError>;

    fn send_packet(&mut self, data: &[u8]) -> Result<(), TransportError>;

    fn send_resource(&mut self, data: &[u8]) -> Result<ResourceHandle, TransportError>;

    fn close(&mut self);

    /// Drains events accumulated since the last poll. Never blocks; callers
    /// suspend/cancel at a layer this crate does not own (spec.md §5).
    fn poll_events(&mut self) -> Vec<LinkEvent>;
}

/// The entry point `lxmf` depends on to reach destinations, recall
/// identities, and send opportunistic packets.
pub trait Transport {
    type Link: Link;

    fn mdu(&self) -> usize;

    fn recall_identity(&self, destination_hash: AddressHash) -> Option<Identity>;

    fn register_identity(&self, destination_hash: AddressHash, identity: Identity);

    /// Opens (or reuses) a link to `destination_hash`. Per spec.md §4.4,
    /// multiple messages to the same destination share a link where
    /// possible.
    fn open_link(&self, destination_hash: AddressHash) -> Result<Self::Link, TransportError>;

    /// Opportunistic single-shot encrypted packet, no link establishment.
    fn send_opportunistic(
        &self,
        destination_hash: AddressHash,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Announces a destination's identity and (optionally) application
    /// data, for discovery by recall on other nodes.
    fn announce(&self, destination_hash: AddressHash, identity: Identity, app_data: Vec<u8>);
}
