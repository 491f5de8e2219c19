//! Paper/offline delivery (spec §4.3 supplemental `lxm://` format): a
//! message packed for out-of-band carriage round-trips through an actual
//! file on disk, the way a host saving a `.lxm` attachment or a QR-code
//! payload would.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use lxmf::message::wire;
use lxmf::message::{DeliveryMethod, Message};
use rand_core::OsRng;
use reticulum::identity::PrivateIdentity;

#[test]
fn paper_uri_round_trips_through_a_file() {
    let signer = PrivateIdentity::generate(&mut OsRng);
    let recipient = PrivateIdentity::generate(&mut OsRng);

    let mut msg = Message::create(
        recipient.public().hash().into(),
        [1; 16],
        1700000000.0,
        b"offline".to_vec(),
        b"carried out of band".to_vec(),
        BTreeMap::new(),
        DeliveryMethod::Paper,
    );
    msg.pack(&signer).unwrap();
    let uri = msg.pack_paper(&recipient.public(), OsRng).unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(uri.as_bytes()).unwrap();
    file.flush().unwrap();

    let mut reloaded = String::new();
    std::fs::File::open(file.path())
        .unwrap()
        .read_to_string(&mut reloaded)
        .unwrap();
    assert_eq!(reloaded, uri);

    let (destination_hash, ciphertext) = Message::decode_lxm_uri(&reloaded).unwrap();
    let context: [u8; 16] = destination_hash.into();
    let plaintext = wire::decrypt_for_identity(&recipient, &context, &ciphertext).unwrap();

    let mut full = context.to_vec();
    full.extend_from_slice(&plaintext);
    let unpacked = Message::from_wire(&full).unwrap();
    assert_eq!(unpacked.title, b"offline");
    assert_eq!(unpacked.content, b"carried out of band");
}
