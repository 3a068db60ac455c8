//! Content hashing for the ledger anchor.
//!
//! A record's digest is SHA-256 over its postcard encoding. Postcard is
//! deterministic for a given value, so the same record always hashes the
//! same way.

use latchkey_types::{ContentHash, HASH_LENGTH};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::collaborator::{AnchorKind, AnchorRecord};
use crate::grant::AccessGrant;
use crate::request::AccessRequest;

/// Hashes the canonical encoding of `value`.
///
/// # Errors
///
/// Returns the postcard error if `value` cannot be encoded.
pub fn content_hash<T: Serialize>(value: &T) -> Result<ContentHash, postcard::Error> {
    let bytes = postcard::to_allocvec(value)?;
    let digest: [u8; HASH_LENGTH] = Sha256::digest(&bytes).into();
    Ok(ContentHash::from_bytes(digest))
}

pub(crate) fn request_record(request: &AccessRequest) -> Result<AnchorRecord, postcard::Error> {
    Ok(AnchorRecord {
        kind: AnchorKind::Request,
        id: request.id.as_uuid(),
        hash: content_hash(request)?,
    })
}

pub(crate) fn grant_record(grant: &AccessGrant) -> Result<AnchorRecord, postcard::Error> {
    Ok(AnchorRecord {
        kind: AnchorKind::Grant,
        id: grant.id.as_uuid(),
        hash: content_hash(grant)?,
    })
}
