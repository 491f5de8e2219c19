/// Error taxonomy for the LXMF messaging core (spec §7).
///
/// `StructuralDecode`/`SignatureInvalid` are recovered locally by callers: the
/// Router drops the message and does not retry. `StampInsufficient` /
/// `LinkEstablishmentFailed` / `LinkClosed` / `ResourceTransferFailed` /
/// `TransferTimeout` map onto `Message` state transitions (REJECTED or
/// FAILED) and are surfaced to `failed_callback`.
#[derive(Debug, thiserror::Error)]
pub enum LxmfError {
    #[error("structural decode error: {0}")]
    StructuralDecode(String),

    #[error("signature could not be verified: source identity {0} unknown")]
    UnknownSourceIdentity(String),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("propagation node rejected stamp (have {have}, need {need})")]
    StampInsufficient { have: u32, need: u32 },

    #[error("link establishment failed: {0}")]
    LinkEstablishmentFailed(String),

    #[error("link closed before completion")]
    LinkClosed,

    #[error("resource transfer failed: {0}")]
    ResourceTransferFailed(String),

    #[error("operation timed out")]
    TransferTimeout,

    #[error("encode error: {0}")]
    Encode(String),
}

impl From<reticulum::contract::TransportError> for LxmfError {
    fn from(err: reticulum::contract::TransportError) -> Self {
        use reticulum::contract::TransportError as T;
        match err {
            T::NoPath(hash) => LxmfError::LinkEstablishmentFailed(format!("no path to {hash}")),
            T::LinkTimeout => LxmfError::LinkEstablishmentFailed("timed out".into()),
            T::LinkClosed => LxmfError::LinkClosed,
            T::ResourceFailed(reason) => LxmfError::ResourceTransferFailed(reason),
            T::ExceedsMdu(have, max) => {
                LxmfError::Encode(format!("payload of {have} bytes exceeds MDU {max}"))
            }
            T::UnknownIdentity(hash) => LxmfError::UnknownSourceIdentity(hash.to_string()),
        }
    }
}
