// ── Crypto primitives ──
//
// RSA key exchange, AES-256-CBC command encryption with rotating salts,
// and the credential/token hashes used by the token endpoints.

use std::fmt;
use std::str::FromStr;

use aes::Aes256;
use aes::cipher::block_padding::ZeroPadding;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE, HEXUPPER};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::HandshakeError;

pub const AES_KEY_LEN: usize = 32;
pub const AES_IV_LEN: usize = 16;

/// Uses of one salt before the cipher announces its successor.
pub const SALT_MAX_USES: u32 = 30;

const SALT_BYTES: usize = 8;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

// ── Public key ───────────────────────────────────────────────────────

/// Parse the Miniserver's public key.
///
/// The controller wraps a SubjectPublicKeyInfo in a PEM block labelled
/// `CERTIFICATE`, sometimes without line breaks. Any label is accepted,
/// as is bare base64 and a PKCS#1 body.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, HandshakeError> {
    let body = strip_pem_armor(pem);
    if body.is_empty() {
        return Err(HandshakeError::MalformedPublicKey("empty key".into()));
    }
    let der = BASE64
        .decode(body.as_bytes())
        .map_err(|e| HandshakeError::MalformedPublicKey(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| HandshakeError::MalformedPublicKey(e.to_string()))
}

fn strip_pem_armor(pem: &str) -> String {
    let mut body = String::with_capacity(pem.len());
    let mut rest = pem.trim();
    while let Some(start) = rest.find("-----") {
        body.push_str(&rest[..start]);
        let after = &rest[start + 5..];
        rest = after.find("-----").map_or("", |end| &after[end + 5..]);
    }
    body.push_str(rest);
    body.retain(|c| !c.is_whitespace());
    body
}

// ── Session key ──────────────────────────────────────────────────────

/// AES-256 key and IV negotiated for one connection.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; AES_KEY_LEN],
    iv: [u8; AES_IV_LEN],
}

impl SessionKey {
    /// Fresh random key material.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; AES_KEY_LEN];
        let mut iv = [0u8; AES_IV_LEN];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn from_parts(key: [u8; AES_KEY_LEN], iv: [u8; AES_IV_LEN]) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; AES_KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; AES_IV_LEN] {
        &self.iv
    }

    /// RSA-encrypt `"{key_hex}:{iv_hex}"` and base64 the result, ready for
    /// `jdev/sys/keyexchange/{..}`.
    pub fn exchange_payload(&self, public_key: &RsaPublicKey) -> Result<String, HandshakeError> {
        let mut plain = format!("{}:{}", HEXLOWER.encode(&self.key), HEXLOWER.encode(&self.iv));
        let sealed = public_key
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, plain.as_bytes())
            .map_err(|e| HandshakeError::Crypto(e.to_string()));
        plain.zeroize();
        Ok(BASE64.encode(sealed?))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<ZeroPadding>(plaintext)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

// ── Command cipher ───────────────────────────────────────────────────

/// Encrypts commands for `jdev/sys/enc/` with a rotating salt.
#[derive(Debug, Clone)]
pub struct CommandCipher {
    key: SessionKey,
    salt: String,
    uses: u32,
}

impl CommandCipher {
    pub fn new(key: SessionKey) -> Self {
        Self::with_salt(key, random_salt())
    }

    pub fn with_salt(key: SessionKey, salt: impl Into<String>) -> Self {
        Self {
            key,
            salt: salt.into(),
            uses: 0,
        }
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.key
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Build the salted plaintext for `command`, rotating the salt once it
    /// has been used [`SALT_MAX_USES`] times.
    pub fn salted(&mut self, command: &str) -> String {
        if self.uses >= SALT_MAX_USES {
            let next = random_salt();
            let plain = format!("nextSalt/{}/{next}/{command}", self.salt);
            self.salt = next;
            self.uses = 1;
            plain
        } else {
            self.uses += 1;
            format!("salt/{}/{command}", self.salt)
        }
    }

    /// Encrypt `command` into a `jdev/sys/enc/{cipher}` path.
    pub fn encrypt_command(&mut self, command: &str) -> String {
        let mut plain = self.salted(command);
        let sealed = self.key.encrypt(plain.as_bytes());
        plain.zeroize();
        let encoded = BASE64.encode(sealed);
        let escaped: String = url::form_urlencoded::byte_serialize(encoded.as_bytes()).collect();
        format!("jdev/sys/enc/{escaped}")
    }
}

fn random_salt() -> String {
    let mut raw = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    HEXLOWER.encode(&raw)
}

// ── Hashes ───────────────────────────────────────────────────────────

/// Hash algorithm announced by `getkey2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlg {
    #[default]
    Sha1,
    Sha256,
}

impl FromStr for HashAlg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHA1" | "SHA-1" => Ok(Self::Sha1),
            "SHA256" | "SHA-256" => Ok(Self::Sha256),
            other => Err(format!("unsupported hash algorithm '{other}'")),
        }
    }
}

/// `upper_hex(H("{password}:{salt}"))`.
pub fn hash_password(alg: HashAlg, password: &str, salt: &str) -> String {
    let mut input = format!("{password}:{salt}");
    let digest = match alg {
        HashAlg::Sha1 => Sha1::digest(input.as_bytes()).to_vec(),
        HashAlg::Sha256 => Sha256::digest(input.as_bytes()).to_vec(),
    };
    input.zeroize();
    HEXUPPER.encode(&digest)
}

/// `lower_hex(HMAC_H(key, message))`.
pub fn hmac_hex(alg: HashAlg, key: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length, so `new_from_slice` cannot fail.
    match alg {
        HashAlg::Sha1 => Hmac::<Sha1>::new_from_slice(key)
            .map(|mut mac| {
                mac.update(message);
                HEXLOWER.encode(&mac.finalize().into_bytes())
            })
            .unwrap_or_default(),
        HashAlg::Sha256 => Hmac::<Sha256>::new_from_slice(key)
            .map(|mut mac| {
                mac.update(message);
                HEXLOWER.encode(&mac.finalize().into_bytes())
            })
            .unwrap_or_default(),
    }
}

fn looks_like_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Decode a one-time key from `getkey`/`getkey2`.
///
/// Keys arrive hex-encoded, sometimes twice (hex of the ASCII hex). A key
/// that is not hex at all is used as its UTF-8 bytes.
pub fn decode_key(raw: &str) -> Vec<u8> {
    let trimmed = raw.trim();
    if !looks_like_hex(trimmed) {
        return trimmed.as_bytes().to_vec();
    }
    let Ok(once) = HEXLOWER_PERMISSIVE.decode(trimmed.as_bytes()) else {
        return trimmed.as_bytes().to_vec();
    };
    if let Ok(text) = std::str::from_utf8(&once) {
        let inner = text.trim();
        if looks_like_hex(inner) {
            if let Ok(twice) = HEXLOWER_PERMISSIVE.decode(inner.as_bytes()) {
                return twice;
            }
        }
    }
    once
}
