//! LXMF messaging core: wire codec, proof-of-work stamps, the message
//! state machine, the delivery engine, the propagation client, and the
//! `Router` facade that ties them together over a caller-supplied
//! transport. No transport, storage, or application layer lives here —
//! those are the embedder's concern (spec §1, §5).

pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod message;
pub mod propagation;
pub mod router;
pub mod stamper;

pub use error::LxmfError;
pub use message::{DeliveryMethod, Message, Payload, WireMessage};
pub use propagation::PropagationNodeRecord;
pub use router::Router;
