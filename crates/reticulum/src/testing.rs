//! An in-memory implementation of the `contract` traits, used by this
//! crate's own tests and by `lxmf`'s integration tests. Links establish and
//! deliver synchronously; failure modes are opt-in via `Network::set_*`
//! hooks rather than randomized, so tests stay deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::contract::{Link, LinkEvent, ResourceHandle, Transport, TransportError};
use crate::hash::AddressHash;
use crate::identity::{Identity, PrivateIdentity};

const DEFAULT_MDU: usize = 500;

#[derive(Default)]
struct NetworkInner {
    identities: BTreeMap<AddressHash, Identity>,
    announces: BTreeMap<AddressHash, (Identity, Vec<u8>)>,
    opportunistic_mailboxes: BTreeMap<AddressHash, VecDeque<Vec<u8>>>,
    links: BTreeMap<u64, LinkState>,
    next_link_id: u64,
    unreachable: BTreeSet<AddressHash>,
    link_timeouts: BTreeSet<AddressHash>,
    resource_failures: BTreeSet<AddressHash>,
}

struct LinkState {
    initiator: AddressHash,
    target: AddressHash,
    established: bool,
    closed: bool,
    initiator_identified_as: Option<AddressHash>,
    initiator_inbox: VecDeque<LinkEvent>,
    target_inbox: VecDeque<LinkEvent>,
    next_resource_id: u64,
}

/// Shared simulated network. Clone `InMemoryTransport` handles from the same
/// `Network` to let two or more parties exchange links and packets.
#[derive(Clone, Default)]
pub struct Network {
    inner: Arc<Mutex<NetworkInner>>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, local: AddressHash) -> InMemoryTransport {
        InMemoryTransport { network: self.clone(), local, mdu: DEFAULT_MDU }
    }

    /// Opening a link to `destination` will fail with `NoPath`.
    pub fn set_unreachable(&self, destination: AddressHash) {
        self.inner.lock().expect("lock poisoned").unreachable.insert(destination);
    }

    /// Opening a link to `destination` will fail with `LinkTimeout`.
    pub fn set_link_timeout(&self, destination: AddressHash) {
        self.inner.lock().expect("lock poisoned").link_timeouts.insert(destination);
    }

    /// Any resource sent over a link targeting `destination` concludes
    /// with `success: false`.
    pub fn set_resource_failure(&self, destination: AddressHash) {
        self.inner.lock().expect("lock poisoned").resource_failures.insert(destination);
    }

    /// Pushes a raw error-signal packet (spec.md §6) to whichever side of
    /// `link_id` did not send it, simulating a node rejection.
    pub fn inject_error_signal(&self, link_id: u64, to_initiator: bool, code: u8) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(link) = inner.links.get_mut(&link_id) {
            let inbox = if to_initiator { &mut link.initiator_inbox } else { &mut link.target_inbox };
            inbox.push_back(LinkEvent::ErrorSignal(code));
        }
    }
}

pub struct InMemoryTransport {
    network: Network,
    local: AddressHash,
    mdu: usize,
}

impl InMemoryTransport {
    pub fn local_hash(&self) -> AddressHash {
        self.local
    }

    pub fn recall_announce(&self, destination_hash: AddressHash) -> Option<(Identity, Vec<u8>)> {
        self.network.inner.lock().expect("lock poisoned").announces.get(&destination_hash).cloned()
    }

    /// Pulls the next opportunistic packet addressed to this transport's
    /// destination, if any.
    pub fn next_opportunistic(&self) -> Option<Vec<u8>> {
        self.network
            .inner
            .lock()
            .expect("lock poisoned")
            .opportunistic_mailboxes
            .get_mut(&self.local)
            .and_then(|q| q.pop_front())
    }

    /// Returns the target-side handle for a link previously opened against
    /// this transport's destination, letting a test play the role of the
    /// peer that did not initiate the link (e.g. a propagation node
    /// answering requests on the link a client opened to it).
    pub fn accept_link(&self, link_id: u64) -> Option<InMemoryLink> {
        let inner = self.network.inner.lock().expect("lock poisoned");
        let link = inner.links.get(&link_id)?;
        if link.target != self.local {
            return None;
        }
        Some(InMemoryLink {
            network: self.network.clone(),
            link_id,
            local: self.local,
            remote: link.initiator,
            mdu: self.mdu,
            as_initiator: false,
        })
    }
}

impl Transport for InMemoryTransport {
    type Link = InMemoryLink;

    fn mdu(&self) -> usize {
        self.mdu
    }

    fn recall_identity(&self, destination_hash: AddressHash) -> Option<Identity> {
        self.network.inner.lock().expect("lock poisoned").identities.get(&destination_hash).copied()
    }

    fn register_identity(&self, destination_hash: AddressHash, identity: Identity) {
        self.network.inner.lock().expect("lock poisoned").identities.insert(destination_hash, identity);
    }

    fn open_link(&self, destination_hash: AddressHash) -> Result<Self::Link, TransportError> {
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        if inner.unreachable.contains(&destination_hash) {
            log::debug!("open_link: no path to {destination_hash}");
            return Err(TransportError::NoPath(destination_hash));
        }
        if inner.link_timeouts.contains(&destination_hash) {
            log::debug!("open_link: timed out reaching {destination_hash}");
            return Err(TransportError::LinkTimeout);
        }
        let id = inner.next_link_id;
        inner.next_link_id += 1;
        inner.links.insert(
            id,
            LinkState {
                initiator: self.local,
                target: destination_hash,
                established: true,
                closed: false,
                initiator_identified_as: None,
                initiator_inbox: VecDeque::from([LinkEvent::Established]),
                target_inbox: VecDeque::from([LinkEvent::Established]),
                next_resource_id: 0,
            },
        );
        Ok(InMemoryLink {
            network: self.network.clone(),
            link_id: id,
            local: self.local,
            remote: destination_hash,
            mdu: self.mdu,
            as_initiator: true,
        })
    }

    fn send_opportunistic(
        &self,
        destination_hash: AddressHash,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        if inner.unreachable.contains(&destination_hash) {
            return Err(TransportError::NoPath(destination_hash));
        }
        inner
            .opportunistic_mailboxes
            .entry(destination_hash)
            .or_default()
            .push_back(data.to_vec());
        Ok(())
    }

    fn announce(&self, destination_hash: AddressHash, identity: Identity, app_data: Vec<u8>) {
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        inner.identities.insert(destination_hash, identity);
        inner.announces.insert(destination_hash, (identity, app_data));
    }
}

pub struct InMemoryLink {
    network: Network,
    link_id: u64,
    local: AddressHash,
    remote: AddressHash,
    mdu: usize,
    as_initiator: bool,
}

impl InMemoryLink {
    pub fn link_id(&self) -> u64 {
        self.link_id
    }
}

impl Link for InMemoryLink {
    fn destination_hash(&self) -> AddressHash {
        self.remote
    }

    fn mdu(&self) -> usize {
        self.mdu
    }

    fn is_established(&self) -> bool {
        let inner = self.network.inner.lock().expect("lock poisoned");
        inner.links.get(&self.link_id).map(|l| l.established && !l.closed).unwrap_or(false)
    }

    fn identify(&mut self, identity: &PrivateIdentity) -> Result<(), TransportError> {
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        let link = inner.links.get_mut(&self.link_id).ok_or(TransportError::LinkClosed)?;
        if link.closed {
            return Err(TransportError::LinkClosed);
        }
        link.initiator_identified_as = Some(identity.public().hash());
        Ok(())
    }

    fn send_packet(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > self.mdu {
            return Err(TransportError::ExceedsMdu(data.len(), self.mdu));
        }
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        let link = inner.links.get_mut(&self.link_id).ok_or(TransportError::LinkClosed)?;
        if link.closed {
            return Err(TransportError::LinkClosed);
        }
        let (own_inbox, peer_inbox) = if self.as_initiator {
            (&mut link.initiator_inbox, &mut link.target_inbox)
        } else {
            (&mut link.target_inbox, &mut link.initiator_inbox)
        };
        peer_inbox.push_back(LinkEvent::PacketReceived(data.to_vec()));
        own_inbox.push_back(LinkEvent::PacketDelivered);
        Ok(())
    }

    fn send_resource(&mut self, data: &[u8]) -> Result<ResourceHandle, TransportError> {
        let remote = self.remote;
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        let fail = inner.resource_failures.contains(&remote);
        let link = inner.links.get_mut(&self.link_id).ok_or(TransportError::LinkClosed)?;
        if link.closed {
            return Err(TransportError::LinkClosed);
        }
        let handle = ResourceHandle(link.next_resource_id);
        link.next_resource_id += 1;
        let (own_inbox, peer_inbox) = if self.as_initiator {
            (&mut link.initiator_inbox, &mut link.target_inbox)
        } else {
            (&mut link.target_inbox, &mut link.initiator_inbox)
        };
        peer_inbox.push_back(LinkEvent::ResourceStarted(handle));
        if !fail {
            peer_inbox.push_back(LinkEvent::PacketReceived(data.to_vec()));
        }
        peer_inbox.push_back(LinkEvent::ResourceConcluded { handle, success: !fail });
        own_inbox.push_back(LinkEvent::ResourceConcluded { handle, success: !fail });
        Ok(handle)
    }

    fn close(&mut self) {
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        if let Some(link) = inner.links.get_mut(&self.link_id) {
            link.closed = true;
            link.initiator_inbox.push_back(LinkEvent::Closed);
            link.target_inbox.push_back(LinkEvent::Closed);
        }
    }

    fn poll_events(&mut self) -> Vec<LinkEvent> {
        let mut inner = self.network.inner.lock().expect("lock poisoned");
        let Some(link) = inner.links.get_mut(&self.link_id) else { return Vec::new() };
        let inbox = if self.as_initiator { &mut link.initiator_inbox } else { &mut link.target_inbox };
        inbox.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn addr(byte: u8) -> AddressHash {
        AddressHash::new([byte; 16])
    }

    #[test]
    fn packet_send_delivers_and_proves() {
        let net = Network::new();
        let a = net.handle(addr(1));
        let b_id = PrivateIdentity::generate(&mut OsRng);
        a.register_identity(addr(2), b_id.public());

        let mut link = a.open_link(addr(2)).unwrap();
        assert!(matches!(link.poll_events()[..], [LinkEvent::Established]));
        link.send_packet(b"hello").unwrap();
        assert!(matches!(link.poll_events()[..], [LinkEvent::PacketDelivered]));
    }

    #[test]
    fn unreachable_destination_fails_to_open() {
        let net = Network::new();
        let a = net.handle(addr(1));
        net.set_unreachable(addr(9));
        assert!(matches!(a.open_link(addr(9)), Err(TransportError::NoPath(_))));
    }

    #[test]
    fn resource_failure_hook_reports_unsuccessful_conclusion() {
        let net = Network::new();
        let a = net.handle(addr(1));
        net.set_resource_failure(addr(2));
        let mut link = a.open_link(addr(2)).unwrap();
        link.poll_events();
        link.send_resource(&vec![0u8; 10]).unwrap();
        let events = link.poll_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, LinkEvent::ResourceConcluded { success: false, .. })));
    }

    #[test]
    fn opportunistic_packet_reaches_mailbox() {
        let net = Network::new();
        let a = net.handle(addr(1));
        let b = net.handle(addr(2));
        a.send_opportunistic(addr(2), b"broadcast").unwrap();
        assert_eq!(b.next_opportunistic().unwrap(), b"broadcast");
    }
}
