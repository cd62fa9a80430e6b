//! Secure envelope — the AEAD sub-framing carried inside a packet's
//! payload when the `Encrypted` flag is set.
//!
//! The outer wire header stays in cleartext (routing/length must be
//! readable without decrypting); only the payload becomes this envelope —
//! a sub-envelope nested inside the payload, rather than a header-level
//! change.

use crate::crypto::CipherSuite;
use crate::error::NalixError;

/// ASCII "NALX" — the secure envelope's magic prefix.
pub const MAGIC: [u8; 4] = *b"NALX";

/// Current secure envelope version.
pub const VERSION: u8 = 1;

/// Fixed prefix before the nonce: magic(4) + version(1) + suite(1) + flags(1) + nonce_len(1) + seq(4).
const PREFIX_LEN: usize = 12;

/// A parsed secure envelope: everything up to, but not including, the
/// authentication tag appended by the AEAD suite (the tag is treated as
/// part of "ciphertext" by [`crate::crypto`], which verifies it).
#[derive(Debug, Clone)]
pub struct SecureEnvelope<'a> {
    pub suite: CipherSuite,
    pub seq: u32,
    pub nonce: &'a [u8],
    pub ciphertext: &'a [u8],
}

fn nonce_len_for(suite: CipherSuite) -> u8 {
    match suite {
        CipherSuite::Xtea => 8,
        CipherSuite::AesGcm | CipherSuite::ChaCha20Poly1305 => 12,
    }
}

/// Serialize a secure envelope: `MAGIC | version | suite | flags(0) |
/// nonce_len | seq(LE u32) | nonce | ciphertext‖tag`.
pub fn encode(suite: CipherSuite, seq: u32, nonce: &[u8], ciphertext_and_tag: &[u8]) -> Vec<u8> {
    let nonce_len = nonce_len_for(suite);
    debug_assert_eq!(nonce.len(), nonce_len as usize);

    let mut out = Vec::with_capacity(PREFIX_LEN + nonce.len() + ciphertext_and_tag.len());
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(suite as u8);
    out.push(0); // flags, reserved
    out.push(nonce_len);
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(nonce);
    out.extend_from_slice(ciphertext_and_tag);
    out
}

/// Parse a secure envelope. Fails with [`NalixError::EnvelopeMalformed`]
/// on a magic/version mismatch or truncation — the packet is dropped
/// whole, no partial processing.
pub fn decode(data: &[u8]) -> Result<SecureEnvelope<'_>, NalixError> {
    if data.len() < PREFIX_LEN {
        return Err(NalixError::EnvelopeMalformed("shorter than fixed prefix"));
    }
    if data[0..4] != MAGIC {
        return Err(NalixError::EnvelopeMalformed("bad magic"));
    }
    let version = data[4];
    if version != VERSION {
        return Err(NalixError::EnvelopeMalformed("unsupported version"));
    }
    let suite = CipherSuite::from_u8(data[5])
        .ok_or(NalixError::EnvelopeMalformed("unknown cipher suite"))?;
    let nonce_len = data[7] as usize;
    if nonce_len != nonce_len_for(suite) as usize {
        return Err(NalixError::EnvelopeMalformed("nonce length doesn't match suite"));
    }
    let seq = u32::from_le_bytes(
        data[8..12]
            .try_into()
            .map_err(|_| NalixError::EnvelopeMalformed("truncated seq"))?,
    );

    let nonce_start = PREFIX_LEN;
    let nonce_end = nonce_start + nonce_len;
    if data.len() < nonce_end {
        return Err(NalixError::EnvelopeMalformed("truncated nonce"));
    }

    Ok(SecureEnvelope {
        suite,
        seq,
        nonce: &data[nonce_start..nonce_end],
        ciphertext: &data[nonce_end..],
    })
}
