//! Canonical encoding and digest computation for tree nodes.
//!
//! Entry metadata is encoded with RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 seconds)
//!
//! The canonical encoding is critical: two replicas that hold the same
//! metadata must produce identical bytes, and thus identical digests,
//! regardless of platform or insertion history.

use std::collections::BTreeMap;

use crate::digest::Digest;
use crate::metadata::EntryMetadata;
use crate::types::EntryId;

/// Domain separator for metadata digests.
const METADATA_DOMAIN: &[u8] = b"fstree-meta-v0:";

/// Domain separator for node (aggregate) digests.
const NODE_DOMAIN: &[u8] = b"fstree-node-v0:";

/// Metadata field keys (integer keys for compact encoding).
///
/// Keys 0-23 encode as single bytes in CBOR.
mod keys {
    pub const NAME: u64 = 0;
    pub const KIND: u64 = 1;
    pub const SIZE: u64 = 2;
    pub const MODIFIED: u64 = 3;
    pub const ATTRIBUTES: u64 = 4;
}

/// CBOR major types used here.
mod major {
    pub const UNSIGNED: u8 = 0;
    pub const NEGATIVE: u8 = 1;
    pub const TEXT: u8 = 3;
    pub const MAP: u8 = 5;
}

/// Encode entry metadata to canonical CBOR bytes.
///
/// `hints` are deliberately not part of the encoding.
pub fn canonical_metadata_bytes(metadata: &EntryMetadata) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + metadata.name.len());

    // Map header: 5 fields, keys already in encoded order (0-4)
    encode_uint(&mut buf, major::MAP, 5);

    // 0: name
    encode_uint(&mut buf, major::UNSIGNED, keys::NAME);
    encode_text(&mut buf, &metadata.name);

    // 1: kind
    encode_uint(&mut buf, major::UNSIGNED, keys::KIND);
    encode_uint(&mut buf, major::UNSIGNED, u64::from(metadata.kind.to_u8()));

    // 2: size
    encode_uint(&mut buf, major::UNSIGNED, keys::SIZE);
    encode_uint(&mut buf, major::UNSIGNED, metadata.size);

    // 3: modified
    encode_uint(&mut buf, major::UNSIGNED, keys::MODIFIED);
    encode_int(&mut buf, metadata.modified);

    // 4: attributes
    encode_uint(&mut buf, major::UNSIGNED, keys::ATTRIBUTES);
    encode_text_map_canonical(&mut buf, &metadata.attributes);

    buf
}

/// Digest of an entry's own metadata.
pub fn digest_of_metadata(metadata: &EntryMetadata) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(METADATA_DOMAIN);
    hasher.update(&canonical_metadata_bytes(metadata));
    Digest::from(hasher.finalize())
}

/// Aggregate digest of a node: its own digest combined with every child's
/// aggregate digest, in `entry_id` order.
///
/// Taking the children as a `BTreeMap` makes the canonical order a property
/// of the argument type, so insertion history cannot leak into the digest.
pub fn digest_of_node(own_digest: &Digest, children: &BTreeMap<EntryId, Digest>) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(NODE_DOMAIN);
    hasher.update(own_digest.as_bytes());
    hasher.update(&(children.len() as u64).to_be_bytes());
    for (child_id, child_digest) in children {
        hasher.update(&(child_id.len() as u64).to_be_bytes());
        hasher.update(child_id.as_bytes());
        hasher.update(child_digest.as_bytes());
    }
    Digest::from(hasher.finalize())
}

/// Encode a signed integer (major types 0 and 1).
fn encode_int(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, major::UNSIGNED, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.; that is the bitwise complement.
        encode_uint(buf, major::NEGATIVE, !n as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, major::TEXT, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a text-to-text map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison, which puts shorter keys
/// first. This differs from the `BTreeMap` iteration order.
fn encode_text_map_canonical(buf: &mut Vec<u8>, map: &BTreeMap<String, String>) {
    let mut entries: Vec<(Vec<u8>, &str)> = map
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::with_capacity(k.len() + 1);
            encode_text(&mut key_buf, k);
            (key_buf, v.as_str())
        })
        .collect();

    entries.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, major::MAP, entries.len() as u64);
    for (key_bytes, value) in entries {
        buf.extend_from_slice(&key_bytes);
        encode_text(buf, value);
    }
}
