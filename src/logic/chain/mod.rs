//! Keyed Chain - tamper-evident audit log
//!
//! Every record carries `digest = HMAC(key, {prev, payload})` and the
//! digest of the record before it. Records span rotated archives and the
//! active file; `verify_chain` replays all of them offline.

pub mod digest;
pub mod record;
pub mod store;
pub mod verify;

#[cfg(test)]
mod tests;

pub use digest::{canonical_json, keyed_digest, ChainSigner, Keyring, HMAC_ALG};
pub use record::{ChainLink, ChainRecord, ContinuationPayload, RecordKind, TerminalPayload};
pub use store::{recover_head, ChainStore};
pub use verify::{
    archive_files, chain_files, read_chain, verify_chain, ChainVerification, FailureReason,
    VerifyFailure,
};
