//! Security policies and the symmetric crypto profile.
//!
//! Provides three things:
//!   1. Policy descriptors — URIs, key sizes, block sizes, signature sizes
//!   2. Symmetric machinery — P_SHA-256 key derivation, HMAC-SHA-256
//!      signatures, AES-256-CBC encryption, chunk protect/unprotect
//!   3. The asymmetric seam — traits the host implements for certificate
//!      validation and OPN cryptography
//!
//! All derived key material is wiped from memory when dropped. There is no
//! unsafe code in this module.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::status::StatusCode;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Bytes of clear header in an OPN/MSG chunk before the ciphered portion:
/// message header (8) + channel id (4) + token id (4).
pub const SYMMETRIC_CLEAR_PREFIX: usize = 16;

// ── Mode and policy ───────────────────────────────────────────────────────────

/// Message security mode, with its wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum SecurityMode {
    None = 1,
    Sign = 2,
    SignAndEncrypt = 3,
}

impl SecurityMode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(SecurityMode::None),
            2 => Some(SecurityMode::Sign),
            3 => Some(SecurityMode::SignAndEncrypt),
            _ => None,
        }
    }
}

/// Security policy descriptor.
///
/// `None` turns all crypto off. `Basic256Sha256` is the profile the toolkit
/// implements in software for symmetric traffic; its asymmetric half lives
/// behind [`AsymmetricSecurity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    None,
    Basic256Sha256,
}

pub const POLICY_NONE_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
pub const POLICY_BASIC256SHA256_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

impl SecurityPolicy {
    pub fn uri(self) -> &'static str {
        match self {
            SecurityPolicy::None => POLICY_NONE_URI,
            SecurityPolicy::Basic256Sha256 => POLICY_BASIC256SHA256_URI,
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            POLICY_NONE_URI => Some(SecurityPolicy::None),
            POLICY_BASIC256SHA256_URI => Some(SecurityPolicy::Basic256Sha256),
            _ => None,
        }
    }

    /// Symmetric signature length appended to each protected chunk.
    pub fn symmetric_signature_size(self) -> usize {
        match self {
            SecurityPolicy::None => 0,
            SecurityPolicy::Basic256Sha256 => 32,
        }
    }

    /// Symmetric signing / encryption key length.
    pub fn symmetric_key_size(self) -> usize {
        match self {
            SecurityPolicy::None => 0,
            SecurityPolicy::Basic256Sha256 => 32,
        }
    }

    /// Cipher block size (and IV length) for the symmetric cipher.
    pub fn symmetric_block_size(self) -> usize {
        match self {
            SecurityPolicy::None => 1,
            SecurityPolicy::Basic256Sha256 => 16,
        }
    }

    /// Required secure-channel nonce length.
    pub fn nonce_length(self) -> usize {
        match self {
            SecurityPolicy::None => 0,
            SecurityPolicy::Basic256Sha256 => 32,
        }
    }

    /// Clear bytes preceding the ciphered portion of a symmetric chunk.
    pub fn symmetric_header_size(self) -> usize {
        SYMMETRIC_CLEAR_PREFIX
    }
}

// ── Nonces / thumbprints ──────────────────────────────────────────────────────

/// Generate a cryptographically random nonce of the given length.
pub fn generate_nonce(len: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// SHA-1 thumbprint of a DER certificate, as carried in the OPN receiver
/// certificate thumbprint field.
pub fn certificate_thumbprint(der: &[u8]) -> [u8; 20] {
    let digest = Sha1::digest(der);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

// ── Key derivation ────────────────────────────────────────────────────────────

/// One side's symmetric keys for a channel token. Wiped on drop.
pub struct SymmetricKeySet {
    pub signing: Zeroizing<Vec<u8>>,
    pub encryption: Zeroizing<Vec<u8>>,
    pub iv: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for SymmetricKeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs
        f.write_str("SymmetricKeySet {{ .. }}")
    }
}

/// The TLS-style P_SHA-256 pseudo-random function.
pub fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(length));
    // A(1) = HMAC(secret, seed)
    let mut a = {
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(seed);
        mac.finalize().into_bytes()
    };
    while out.len() < length {
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(&a);
        mac.update(seed);
        let block = mac.finalize().into_bytes();
        let take = (length - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);

        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(&a);
        a = mac.finalize().into_bytes();
    }
    out
}

fn split_key_material(policy: SecurityPolicy, material: &[u8]) -> SymmetricKeySet {
    let key = policy.symmetric_key_size();
    let block = policy.symmetric_block_size();
    SymmetricKeySet {
        signing: Zeroizing::new(material[..key].to_vec()),
        encryption: Zeroizing::new(material[key..2 * key].to_vec()),
        iv: Zeroizing::new(material[2 * key..2 * key + block].to_vec()),
    }
}

/// Derive both key sets for a token from the exchanged nonces.
///
/// Returns `(client_keys, server_keys)`: the set each role uses for its own
/// outbound traffic. A side's keys derive from the peer's nonce as secret
/// and its own nonce as seed.
pub fn derive_key_sets(
    policy: SecurityPolicy,
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> Result<(SymmetricKeySet, SymmetricKeySet), CryptoError> {
    if policy == SecurityPolicy::None {
        return Err(CryptoError::PolicyHasNoKeys);
    }
    let expected = policy.nonce_length();
    if client_nonce.len() != expected || server_nonce.len() != expected {
        return Err(CryptoError::BadNonceLength {
            expected,
            client: client_nonce.len(),
            server: server_nonce.len(),
        });
    }
    let total = 2 * policy.symmetric_key_size() + policy.symmetric_block_size();
    let client_material = p_sha256(server_nonce, client_nonce, total);
    let server_material = p_sha256(client_nonce, server_nonce, total);
    Ok((
        split_key_material(policy, &client_material),
        split_key_material(policy, &server_material),
    ))
}

// ── Symmetric chunk protection ────────────────────────────────────────────────

fn hmac_sign(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hmac_verify(key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.verify_slice(signature)
        .map_err(|_| CryptoError::SignatureMismatch)
}

/// Protect a fully assembled plaintext chunk in place.
///
/// `frame` holds the complete chunk with its final `message_size` already
/// set: clear prefix, sequence header, body, and — for `SignAndEncrypt` —
/// padding, with room reserved for the signature by the caller having sized
/// `message_size` accordingly. This function appends the signature and
/// ciphers the protected region.
///
/// Layout produced (SignAndEncrypt):
/// `[clear 16][ E( seq(8) | body | pad_size(1)+pad | signature ) ]`
pub fn protect_chunk(
    policy: SecurityPolicy,
    mode: SecurityMode,
    keys: &SymmetricKeySet,
    frame: &mut Vec<u8>,
) -> Result<(), CryptoError> {
    match (policy, mode) {
        (SecurityPolicy::None, _) | (_, SecurityMode::None) => Ok(()),
        (SecurityPolicy::Basic256Sha256, SecurityMode::Sign) => {
            let signature = hmac_sign(&keys.signing, frame);
            frame.extend_from_slice(&signature);
            Ok(())
        }
        (SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt) => {
            let signature = hmac_sign(&keys.signing, frame);
            frame.extend_from_slice(&signature);
            let block = policy.symmetric_block_size();
            let cipher_len = frame.len() - SYMMETRIC_CLEAR_PREFIX;
            if cipher_len % block != 0 {
                return Err(CryptoError::NotBlockAligned { len: cipher_len });
            }
            let enc = Aes256CbcEnc::new_from_slices(&keys.encryption, &keys.iv)
                .map_err(|_| CryptoError::BadKeyLength)?;
            enc.encrypt_padded_mut::<NoPadding>(&mut frame[SYMMETRIC_CLEAR_PREFIX..], cipher_len)
                .map_err(|_| CryptoError::NotBlockAligned { len: cipher_len })?;
            Ok(())
        }
    }
}

/// Padding bytes (including the pad-size byte) needed so that
/// `seq_header + body + padding + signature` fills whole cipher blocks.
pub fn padding_size(policy: SecurityPolicy, mode: SecurityMode, plain_len: usize) -> usize {
    if mode != SecurityMode::SignAndEncrypt || policy == SecurityPolicy::None {
        return 0;
    }
    let block = policy.symmetric_block_size();
    let sig = policy.symmetric_signature_size();
    let unpadded = plain_len + sig;
    let rem = unpadded % block;
    let pad_total = if rem == 0 { block } else { block - rem };
    // At least the pad-size byte itself; pad bytes all carry (pad_total - 1)
    pad_total
}

/// Reverse [`protect_chunk`]: verify, decrypt and strip security from a raw
/// inbound frame. Returns the offset and length of the sequence header +
/// body region within `frame`.
pub fn unprotect_chunk(
    policy: SecurityPolicy,
    mode: SecurityMode,
    keys: &SymmetricKeySet,
    frame: &mut [u8],
) -> Result<usize, CryptoError> {
    match (policy, mode) {
        (SecurityPolicy::None, _) | (_, SecurityMode::None) => {
            Ok(frame.len() - SYMMETRIC_CLEAR_PREFIX)
        }
        (SecurityPolicy::Basic256Sha256, SecurityMode::Sign) => {
            let sig = policy.symmetric_signature_size();
            if frame.len() < SYMMETRIC_CLEAR_PREFIX + sig {
                return Err(CryptoError::TooShort { len: frame.len() });
            }
            let (data, signature) = frame.split_at(frame.len() - sig);
            hmac_verify(&keys.signing, data, signature)?;
            Ok(frame.len() - SYMMETRIC_CLEAR_PREFIX - sig)
        }
        (SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt) => {
            let block = policy.symmetric_block_size();
            let sig = policy.symmetric_signature_size();
            let cipher_len = frame
                .len()
                .checked_sub(SYMMETRIC_CLEAR_PREFIX)
                .ok_or(CryptoError::TooShort { len: frame.len() })?;
            if cipher_len == 0 || cipher_len % block != 0 {
                return Err(CryptoError::NotBlockAligned { len: cipher_len });
            }
            let dec = Aes256CbcDec::new_from_slices(&keys.encryption, &keys.iv)
                .map_err(|_| CryptoError::BadKeyLength)?;
            dec.decrypt_padded_mut::<NoPadding>(&mut frame[SYMMETRIC_CLEAR_PREFIX..])
                .map_err(|_| CryptoError::NotBlockAligned { len: cipher_len })?;

            if frame.len() < SYMMETRIC_CLEAR_PREFIX + sig + 1 {
                return Err(CryptoError::TooShort { len: frame.len() });
            }
            let (data, signature) = frame.split_at(frame.len() - sig);
            hmac_verify(&keys.signing, data, signature)?;

            let pad_size = frame[frame.len() - sig - 1] as usize;
            let plain_len = frame
                .len()
                .checked_sub(SYMMETRIC_CLEAR_PREFIX + sig + pad_size + 1)
                .ok_or(CryptoError::PaddingInvalid)?;
            // Every padding byte must equal the pad-size byte
            let pad_start = SYMMETRIC_CLEAR_PREFIX + plain_len;
            if frame[pad_start..pad_start + pad_size]
                .iter()
                .any(|&b| b as usize != pad_size)
            {
                return Err(CryptoError::PaddingInvalid);
            }
            Ok(plain_len)
        }
    }
}

// ── Asymmetric seam ───────────────────────────────────────────────────────────

/// Certificate validation, injected by the host.
///
/// Called exactly once per new secure channel — never on token renewal.
pub trait PkiProvider: Send + Sync {
    fn validate(&self, certificate_chain: &[u8]) -> Result<(), StatusCode>;
}

/// A PKI that accepts any certificate. For tests and closed networks only.
pub struct PermissivePki;

impl PkiProvider for PermissivePki {
    fn validate(&self, _certificate_chain: &[u8]) -> Result<(), StatusCode> {
        Ok(())
    }
}

/// The asymmetric half of the OPN exchange: certificate-based signatures and
/// nonce key-wrap. Implemented by the host's crypto profile; the toolkit
/// ships only [`NullAsymmetric`] for policy `None`.
pub trait AsymmetricSecurity: Send + Sync {
    /// DER certificate presented in the OPN sender certificate field.
    fn local_certificate(&self) -> Option<&[u8]>;

    /// Signature length for OPN frames signed with the local certificate key.
    fn signature_size(&self) -> usize;

    /// Ciphertext length produced by [`Self::encrypt_for`] for a plaintext of
    /// `plain_len` bytes. The default is an identity transform; block-cipher
    /// profiles override this so frame sizes can be computed before signing.
    fn cipher_text_size(&self, plain_len: usize) -> usize {
        plain_len
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, StatusCode>;

    fn verify(&self, data: &[u8], signature: &[u8], sender_cert: &[u8])
        -> Result<(), StatusCode>;

    /// Encrypt an OPN plaintext for the receiver certificate.
    fn encrypt_for(&self, receiver_cert: &[u8], plain: &[u8]) -> Result<Vec<u8>, StatusCode>;

    /// Decrypt an OPN ciphertext with the local private key.
    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, StatusCode>;
}

/// The no-op profile used with `SecurityPolicy::None`: no certificate, empty
/// signatures, identity transforms.
pub struct NullAsymmetric;

impl AsymmetricSecurity for NullAsymmetric {
    fn local_certificate(&self) -> Option<&[u8]> {
        None
    }

    fn signature_size(&self) -> usize {
        0
    }

    fn sign(&self, _data: &[u8]) -> Result<Vec<u8>, StatusCode> {
        Ok(Vec::new())
    }

    fn verify(
        &self,
        _data: &[u8],
        signature: &[u8],
        _sender_cert: &[u8],
    ) -> Result<(), StatusCode> {
        if signature.is_empty() {
            Ok(())
        } else {
            Err(StatusCode::BAD_SECURITY_CHECKS_FAILED)
        }
    }

    fn encrypt_for(&self, _receiver_cert: &[u8], plain: &[u8]) -> Result<Vec<u8>, StatusCode> {
        Ok(plain.to_vec())
    }

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, StatusCode> {
        Ok(cipher.to_vec())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("policy None derives no keys")]
    PolicyHasNoKeys,

    #[error("nonce length mismatch: expected {expected}, got client {client} / server {server}")]
    BadNonceLength {
        expected: usize,
        client: usize,
        server: usize,
    },

    #[error("key length rejected by cipher")]
    BadKeyLength,

    #[error("ciphered region of {len} bytes is not block aligned")]
    NotBlockAligned { len: usize },

    #[error("signature verification failed")]
    SignatureMismatch,

    #[error("frame of {len} bytes too short for security trailer")]
    TooShort { len: usize },

    #[error("padding bytes are inconsistent")]
    PaddingInvalid,
}

impl CryptoError {
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_SECURITY_CHECKS_FAILED
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> (SymmetricKeySet, SymmetricKeySet) {
        let client_nonce = generate_nonce(32);
        let server_nonce = generate_nonce(32);
        derive_key_sets(SecurityPolicy::Basic256Sha256, &client_nonce, &server_nonce).unwrap()
    }

    /// Build a plaintext chunk shaped like the channel layer does: clear
    /// prefix, sequence header, body, padding for the given mode.
    fn plaintext_chunk(policy: SecurityPolicy, mode: SecurityMode, body: &[u8]) -> Vec<u8> {
        let plain_len = 8 + body.len();
        let pad = padding_size(policy, mode, plain_len);
        let sig = if mode == SecurityMode::None {
            0
        } else {
            policy.symmetric_signature_size()
        };
        let total = SYMMETRIC_CLEAR_PREFIX + plain_len + pad + sig;

        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(b"MSGF");
        frame.extend_from_slice(&(total as u32).to_le_bytes());
        frame.extend_from_slice(&7u32.to_le_bytes()); // channel id
        frame.extend_from_slice(&3u32.to_le_bytes()); // token id
        frame.extend_from_slice(&100u32.to_le_bytes()); // sequence
        frame.extend_from_slice(&1u32.to_le_bytes()); // request id
        frame.extend_from_slice(body);
        if pad > 0 {
            let pad_byte = (pad - 1) as u8;
            frame.resize(frame.len() + pad, pad_byte);
        }
        frame
    }

    #[test]
    fn p_sha256_is_deterministic_and_sized() {
        let a = p_sha256(b"secret", b"seed", 80);
        let b = p_sha256(b"secret", b"seed", 80);
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 80);
        let c = p_sha256(b"secret", b"other-seed", 80);
        assert_ne!(*a, *c);
    }

    #[test]
    fn key_sets_differ_per_role() {
        let client_nonce = generate_nonce(32);
        let server_nonce = generate_nonce(32);
        let (client, server) =
            derive_key_sets(SecurityPolicy::Basic256Sha256, &client_nonce, &server_nonce).unwrap();
        assert_eq!(client.signing.len(), 32);
        assert_eq!(client.encryption.len(), 32);
        assert_eq!(client.iv.len(), 16);
        assert_ne!(*client.signing, *server.signing);
        assert_ne!(*client.encryption, *server.encryption);
    }

    #[test]
    fn derive_rejects_short_nonces() {
        let err = derive_key_sets(SecurityPolicy::Basic256Sha256, &[0u8; 16], &[0u8; 32])
            .expect_err("short client nonce");
        assert!(matches!(err, CryptoError::BadNonceLength { .. }));
    }

    #[test]
    fn sign_round_trip() {
        let (client, _) = test_keys();
        let mut frame = plaintext_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::Sign,
            b"signed body",
        );
        // protect appends the signature the layout reserved
        let unsigned_len = frame.len();
        protect_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::Sign,
            &client,
            &mut frame,
        )
        .unwrap();
        assert_eq!(frame.len(), unsigned_len + 32);

        let plain_len = unprotect_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::Sign,
            &client,
            &mut frame,
        )
        .unwrap();
        assert_eq!(
            &frame[SYMMETRIC_CLEAR_PREFIX + 8..SYMMETRIC_CLEAR_PREFIX + plain_len],
            b"signed body"
        );
    }

    #[test]
    fn sign_detects_tampering() {
        let (client, _) = test_keys();
        let mut frame = plaintext_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::Sign,
            b"payload",
        );
        protect_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::Sign,
            &client,
            &mut frame,
        )
        .unwrap();
        frame[20] ^= 0xFF;
        let err = unprotect_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::Sign,
            &client,
            &mut frame,
        )
        .unwrap_err();
        assert_eq!(err, CryptoError::SignatureMismatch);
    }

    #[test]
    fn encrypt_round_trip() {
        let (client, _) = test_keys();
        let body = b"encrypted body bytes";
        let plain = plaintext_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt,
            body,
        );
        let mut frame = plain.clone();
        protect_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt,
            &client,
            &mut frame,
        )
        .unwrap();
        // Ciphered region must not contain the plaintext body
        assert!(!frame
            .windows(body.len())
            .any(|window| window == body));

        let plain_len = unprotect_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt,
            &client,
            &mut frame,
        )
        .unwrap();
        assert_eq!(plain_len, 8 + body.len());
        assert_eq!(
            &frame[SYMMETRIC_CLEAR_PREFIX + 8..SYMMETRIC_CLEAR_PREFIX + plain_len],
            body
        );
    }

    #[test]
    fn decrypt_with_wrong_keys_fails() {
        let (client, server) = test_keys();
        let mut frame = plaintext_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt,
            b"secret",
        );
        protect_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt,
            &client,
            &mut frame,
        )
        .unwrap();
        assert!(unprotect_chunk(
            SecurityPolicy::Basic256Sha256,
            SecurityMode::SignAndEncrypt,
            &server,
            &mut frame,
        )
        .is_err());
    }

    #[test]
    fn padding_fills_whole_blocks() {
        let policy = SecurityPolicy::Basic256Sha256;
        for body_len in 0..64usize {
            let plain = 8 + body_len;
            let pad = padding_size(policy, SecurityMode::SignAndEncrypt, plain);
            assert!(pad >= 1 && pad <= 16, "pad {pad} for body {body_len}");
            assert_eq!((plain + pad + 32) % 16, 0);
        }
        assert_eq!(padding_size(policy, SecurityMode::Sign, 100), 0);
    }

    #[test]
    fn thumbprint_is_sha1() {
        let t = certificate_thumbprint(b"");
        assert_eq!(
            hex::encode(t),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn null_asymmetric_identity() {
        let sec = NullAsymmetric;
        assert_eq!(sec.signature_size(), 0);
        assert!(sec.local_certificate().is_none());
        assert_eq!(sec.encrypt_for(b"", b"abc").unwrap(), b"abc");
        assert!(sec.verify(b"data", b"", b"").is_ok());
        assert!(sec.verify(b"data", b"x", b"").is_err());
    }

    #[test]
    fn policy_uris_round_trip() {
        for policy in [SecurityPolicy::None, SecurityPolicy::Basic256Sha256] {
            assert_eq!(SecurityPolicy::from_uri(policy.uri()), Some(policy));
        }
        assert_eq!(SecurityPolicy::from_uri("urn:unknown"), None);
    }
}
