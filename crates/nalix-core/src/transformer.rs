//! Packet transformer — pure `compress`/`decompress`/`encrypt`/`decrypt`
//! functions over a [`crate::wire::Packet`], each producing a new packet
//! rather than mutating in place.
//!
//! Ordering rule, enforced by the caller (the Unwrap/Wrap middleware
//! stages), not by this module: outbound is compress-then-encrypt,
//! inbound is decrypt-then-decompress. These functions only refuse the
//! orderings that would be nonsensical regardless of caller discipline —
//! compressing already-encrypted ciphertext, or encrypting a signed
//! packet.

use brotli::enc::BrotliEncoderParams;
use std::io::{Read, Write};

use crate::crypto::{self, CipherSuite};
use crate::error::NalixError;
use crate::secure_envelope;
use crate::wire::{Flags, Packet};

/// Compression backend, encoded as the leading byte of a compressed
/// payload so `decompress` doesn't need out-of-band knowledge of which
/// algorithm was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionAlgorithm {
    GZip = 0,
    Deflate = 1,
    Lz4 = 2,
    Brotli = 3,
}

impl CompressionAlgorithm {
    fn from_u8(v: u8) -> Result<Self, NalixError> {
        match v {
            0 => Ok(Self::GZip),
            1 => Ok(Self::Deflate),
            2 => Ok(Self::Lz4),
            3 => Ok(Self::Brotli),
            other => Err(NalixError::UnknownCompressionAlgorithm(other)),
        }
    }
}

/// Packet length above which compression is worth attempting on TCP.
pub const TCP_COMPRESS_THRESHOLD: usize = 1500;

/// UDP window `(600, 1200)` in which compression is a candidate.
pub const UDP_COMPRESS_RANGE: (usize, usize) = (600, 1200);

/// Whether `packet` is a compression candidate per the size heuristic —
/// used by the Wrap middleware stage, not enforced here.
pub fn is_compression_candidate(packet: &Packet) -> bool {
    use crate::wire::Protocol;
    let len = packet.length();
    match packet.protocol {
        Protocol::Tcp => len > TCP_COMPRESS_THRESHOLD,
        Protocol::Udp => len > UDP_COMPRESS_RANGE.0 && len < UDP_COMPRESS_RANGE.1,
    }
}

/// Compress `packet`'s payload with `algorithm`, setting the `Compressed`
/// flag and recomputing the checksum.
pub fn compress(packet: &Packet, algorithm: CompressionAlgorithm) -> Result<Packet, NalixError> {
    if packet.flags.is_compressed() {
        return Err(NalixError::AlreadyCompressed);
    }
    if packet.flags.is_encrypted() {
        // Compression must precede encryption: an already-encrypted
        // payload is indistinguishable from random bytes and won't
        // compress anyway.
        return Err(NalixError::AlreadyEncrypted);
    }
    if packet.payload.is_empty() {
        return Err(NalixError::EmptyPayload);
    }

    let body = compress_bytes(algorithm, &packet.payload)?;
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(algorithm as u8);
    payload.extend_from_slice(&body);

    let mut out = packet.clone();
    out.flags = out.flags.with(Flags::COMPRESSED);
    out.payload = payload;
    out.checksum = crate::wire::checksum(&out.payload);
    Ok(out)
}

/// Inverse of [`compress`].
pub fn decompress(packet: &Packet) -> Result<Packet, NalixError> {
    if !packet.flags.is_compressed() {
        return Err(NalixError::NotCompressed);
    }
    if packet.payload.is_empty() {
        return Err(NalixError::CorruptCompressedStream(
            "compressed payload has no algorithm byte".to_string(),
        ));
    }

    let algorithm = CompressionAlgorithm::from_u8(packet.payload[0])?;
    let body = decompress_bytes(algorithm, &packet.payload[1..])?;

    let mut out = packet.clone();
    out.flags.clear(Flags::COMPRESSED);
    out.payload = body;
    out.checksum = crate::wire::checksum(&out.payload);
    Ok(out)
}

fn compress_bytes(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>, NalixError> {
    match algorithm {
        CompressionAlgorithm::GZip => {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| NalixError::CorruptCompressedStream(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| NalixError::CorruptCompressedStream(e.to_string()))
        }
        CompressionAlgorithm::Deflate => {
            use flate2::write::DeflateEncoder;
            use flate2::Compression;
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| NalixError::CorruptCompressedStream(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| NalixError::CorruptCompressedStream(e.to_string()))
        }
        CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionAlgorithm::Brotli => {
            let mut out = Vec::new();
            let params = BrotliEncoderParams::default();
            brotli::BrotliCompress(&mut &data[..], &mut out, &params)
                .map_err(|e| NalixError::CorruptCompressedStream(e.to_string()))?;
            Ok(out)
        }
    }
}

fn decompress_bytes(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>, NalixError> {
    match algorithm {
        CompressionAlgorithm::GZip => {
            use flate2::read::GzDecoder;
            let mut out = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| NalixError::CorruptCompressedStream(e.to_string()))?;
            Ok(out)
        }
        CompressionAlgorithm::Deflate => {
            use flate2::read::DeflateDecoder;
            let mut out = Vec::new();
            DeflateDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| NalixError::CorruptCompressedStream(e.to_string()))?;
            Ok(out)
        }
        CompressionAlgorithm::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| NalixError::CorruptCompressedStream(e.to_string())),
        CompressionAlgorithm::Brotli => {
            let mut out = Vec::new();
            let mut reader = brotli::Decompressor::new(data, 4096);
            reader
                .read_to_end(&mut out)
                .map_err(|e| NalixError::CorruptCompressedStream(e.to_string()))?;
            Ok(out)
        }
    }
}

/// Encrypt `packet`'s payload under `key`/`suite`, wrapping it in the
/// secure envelope and setting the `Encrypted` flag.
///
/// `seq` must be the next sequence number for this connection direction —
/// callers own sequence allocation (see `nalix-runtime`'s connection
/// context), this function only frames whatever it's given.
pub fn encrypt(
    packet: &Packet,
    key: &[u8; 32],
    suite: CipherSuite,
    seq: u32,
) -> Result<Packet, NalixError> {
    if !packet.is_transformable() {
        return Err(NalixError::SignedCannotBeTransformed);
    }
    if packet.flags.is_encrypted() {
        return Err(NalixError::AlreadyEncrypted);
    }
    if packet.payload.is_empty() {
        return Err(NalixError::EmptyPayload);
    }

    let nonce = crypto::generate_aead_nonce(suite);
    let aad = packet.opcode.to_le_bytes();
    let ciphertext = crypto::aead_encrypt(suite, key, &nonce, &packet.payload, &aad)?;
    let envelope = secure_envelope::encode(suite, seq, &nonce, &ciphertext);

    let mut out = packet.clone();
    out.flags = out.flags.with(Flags::ENCRYPTED);
    out.payload = envelope;
    out.checksum = crate::wire::checksum(&out.payload);
    Ok(out)
}

/// Inverse of [`encrypt`]. `seq_guard` is consulted (but only advanced on
/// success) so a forged envelope can never poison replay tracking.
pub fn decrypt(
    packet: &Packet,
    key: &[u8; 32],
    suite: CipherSuite,
    seq_guard: &mut crypto::SequenceGuard,
) -> Result<Packet, NalixError> {
    if !packet.flags.is_encrypted() {
        return Err(NalixError::NotEncrypted);
    }

    let envelope = secure_envelope::decode(&packet.payload)?;
    if envelope.suite != suite {
        return Err(NalixError::InvalidKey);
    }
    seq_guard.check(envelope.seq)?;

    let aad = packet.opcode.to_le_bytes();
    let plaintext = crypto::aead_decrypt(suite, key, envelope.nonce, envelope.ciphertext, &aad)?;
    seq_guard.advance(envelope.seq);

    let mut out = packet.clone();
    out.flags.clear(Flags::ENCRYPTED);
    out.payload = plaintext;
    out.checksum = crate::wire::checksum(&out.payload);
    Ok(out)
}
