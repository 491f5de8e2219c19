//! End-to-end exercises of the Router and Propagation Client against the
//! in-memory `reticulum` transport double (SPEC_FULL §2 "Test tooling").
//! Unit tests beside the code cover individual components in isolation;
//! these tests drive the public `Router` facade the way an embedding
//! application would.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use lxmf::config::RouterConfig;
use lxmf::message::{DeliveryMethod, FieldValue, Message, Representation, State};
use lxmf::propagation::{self, NodeRegistry, PropagationNodeRecord, SubmissionOutcome};
use lxmf::router::Router;
use lxmf::stamper::CancellationToken;
use rand_core::OsRng;
use reticulum::contract::Transport;
use reticulum::hash::AddressHash;
use reticulum::identity::PrivateIdentity;
use reticulum::testing::Network;

fn addr(byte: u8) -> AddressHash {
    AddressHash::new([byte; 16])
}

/// S1: a round trip with non-ASCII title/content through the full Router
/// delivery path (OPPORTUNISTIC, since it needs no link polling to settle).
#[test]
fn unicode_message_round_trips_through_opportunistic_delivery() {
    let net = Network::new();
    let mut sender = Router::new(net.handle(addr(1)), RouterConfig::default());
    sender.register_delivery_identity(PrivateIdentity::generate(&mut OsRng));

    // The in-memory opportunistic mailbox is keyed by the transport handle's
    // own local address, so the recipient's handle has to be constructed
    // at its eventual lxmf/delivery destination hash.
    let recipient_identity = PrivateIdentity::generate(&mut OsRng);
    let recipient_destination = reticulum::hash::destination_hash(
        "lxmf.delivery",
        &recipient_identity.public().hash(),
    );
    let mut recipient = Router::new(net.handle(recipient_destination), RouterConfig::default());
    recipient.register_delivery_identity(recipient_identity);

    sender.transport().register_identity(
        recipient_destination,
        recipient.transport().recall_identity(recipient_destination).unwrap(),
    );

    let received: Rc<RefCell<Option<Message>>> = Rc::new(RefCell::new(None));
    let received_clone = received.clone();
    recipient.register_delivery_callback(move |msg| *received_clone.borrow_mut() = Some(msg));

    let mut msg = Message::create(
        recipient_destination.into(),
        [1; 16],
        1700000000.5,
        "中文 / Русский".as_bytes().to_vec(),
        "Hello 🚀".as_bytes().to_vec(),
        BTreeMap::new(),
        DeliveryMethod::Opportunistic,
    );
    sender.handle_outbound(&mut msg, OsRng).unwrap();
    assert_eq!(msg.state, State::Sent);

    let packet = recipient.transport().next_opportunistic().expect("packet in mailbox");
    recipient.handle_inbound_opportunistic(&packet).unwrap();

    let delivered = received.borrow_mut().take().expect("callback fired");
    assert_eq!(delivered.title, "中文 / Русский".as_bytes());
    assert_eq!(delivered.content, "Hello 🚀".as_bytes());
}

/// S2: representation threshold is decided purely by packed-payload size,
/// observed through `Router::handle_outbound`'s packing step.
#[test]
fn representation_threshold_observed_through_router_pack() {
    let net = Network::new();
    let mut router = Router::new(net.handle(addr(1)), RouterConfig::default());
    router.register_delivery_identity(PrivateIdentity::generate(&mut OsRng));
    router.transport().register_identity(addr(2), PrivateIdentity::generate(&mut OsRng).public());

    let mut at_threshold = Message::create(
        [2; 16],
        [1; 16],
        1700000000.0,
        Vec::new(),
        vec![b'X'; 319],
        BTreeMap::new(),
        DeliveryMethod::Opportunistic,
    );
    router.handle_outbound(&mut at_threshold, OsRng).unwrap();
    assert_eq!(at_threshold.representation, Some(Representation::Packet));

    let mut over_threshold = Message::create(
        [2; 16],
        [1; 16],
        1700000000.0,
        Vec::new(),
        vec![b'X'; 320],
        BTreeMap::new(),
        DeliveryMethod::Opportunistic,
    );
    router.handle_outbound(&mut over_threshold, OsRng).unwrap();
    assert_eq!(over_threshold.representation, Some(Representation::Resource));
}

/// S3: a file-attachments field round-trips filenames and binary content
/// exactly through a full direct send/receive cycle.
#[test]
fn file_attachments_field_survives_a_direct_round_trip() {
    let net = Network::new();
    let mut sender = Router::new(net.handle(addr(1)), RouterConfig::default());
    sender.register_delivery_identity(PrivateIdentity::generate(&mut OsRng));
    sender.transport().register_identity(addr(2), PrivateIdentity::generate(&mut OsRng).public());

    let mut rng_bytes = vec![0u8; 1024];
    for (i, byte) in rng_bytes.iter_mut().enumerate() {
        *byte = (i * 61 % 253) as u8;
    }
    let attachments = FieldValue::List(vec![
        FieldValue::List(vec![FieldValue::string("readme.txt"), FieldValue::Bin(b"Hello".to_vec())]),
        FieldValue::List(vec![FieldValue::string("data.bin"), FieldValue::Bin(rng_bytes.clone())]),
    ]);
    let mut fields = BTreeMap::new();
    fields.insert(lxmf::constants::FIELD_FILE_ATTACHMENTS as i64, attachments);

    let mut msg = Message::create(
        [2; 16],
        [1; 16],
        1700000000.0,
        Vec::new(),
        b"see attached".to_vec(),
        fields,
        DeliveryMethod::Direct,
    );
    let mut link = sender.handle_outbound(&mut msg, OsRng).unwrap().unwrap();
    link.poll_events();

    let unpacked = Message::from_wire(msg.packed().unwrap()).unwrap();
    let list = unpacked.fields[&(lxmf::constants::FIELD_FILE_ATTACHMENTS as i64)]
        .as_list()
        .unwrap();
    let second = list[1].as_list().unwrap();
    assert_eq!(second[0].as_str(), Some("data.bin"));
    assert_eq!(second[1].as_bin().unwrap(), rng_bytes.as_slice());
}

/// S5: a propagation node whose advertised cost exceeds the stamp the
/// client generated rejects the submission; the message lands in REJECTED
/// rather than DELIVERED. Driven at the `propagation` module's public level
/// (rather than `Router::handle_outbound`, which resolves a submission
/// synchronously within one call and so cannot observe an externally
/// injected rejection mid-flight) with the node's side played by
/// `accept_link` + `inject_error_signal` against the same in-memory network.
#[test]
fn propagation_submission_rejected_on_insufficient_stamp() {
    let net = Network::new();
    let client_transport = net.handle(addr(1));
    let node_transport = net.handle(addr(9));
    let node_identity = PrivateIdentity::generate(&mut OsRng);

    let mut nodes = NodeRegistry::new();
    nodes.add(PropagationNodeRecord {
        destination_hash: [9; 16],
        identity: node_identity.public(),
        display_name: None,
        stamp_cost: 0,
        stamp_cost_flexibility: 0,
        active: true,
    });
    nodes.set_active(addr(9)).unwrap();
    let node = nodes.active().cloned().unwrap();

    let signer = PrivateIdentity::generate(&mut OsRng);
    let mut msg = Message::create(
        [9; 16],
        [1; 16],
        1700000000.0,
        Vec::new(),
        b"needs a bigger stamp".to_vec(),
        BTreeMap::new(),
        DeliveryMethod::Propagated,
    );
    msg.pack(&signer).unwrap();
    msg.transition(State::Outbound).unwrap();

    let cancel = CancellationToken::new();
    let built = propagation::build_submission(&msg, &node, OsRng, &cancel).unwrap();

    client_transport.register_identity(addr(9), node_identity.public());
    let mut link = client_transport.open_link(addr(9)).unwrap();
    let link_id = link.link_id();

    let mut node_link = node_transport.accept_link(link_id).expect("node side of the link exists");
    node_link.poll_events();
    net.inject_error_signal(link_id, true, lxmf::constants::PN_ERROR_INVALID_STAMP);

    let outcome = propagation::submit_to_node(&mut link, &signer, &mut msg, &built).unwrap();
    assert_eq!(outcome, SubmissionOutcome::StampInsufficient);
    assert_eq!(msg.state, State::Rejected);
}
