//! Curve25519 key material.
//!
//! The registry and client configs carry keys as standard base64. A peer's
//! public key in that form is its canonical identifier in the registry.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};

use crate::error::WireGuardError;

/// Key length in bytes.
pub const KEY_SIZE: usize = 32;

type KeyBytes = [u8; KEY_SIZE];

fn decode(text: &str) -> Result<KeyBytes, WireGuardError> {
    let raw = STANDARD.decode(text.trim())?;
    KeyBytes::try_from(raw.as_slice()).map_err(|_| WireGuardError::InvalidKeyLength(raw.len()))
}

/// A peer or gateway public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PublicKey(KeyBytes);

impl PublicKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes_array(bytes: KeyBytes) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &KeyBytes {
        &self.0
    }

    /// Base64 text form, as written to `PublicKey =` lines.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parses the base64 text form. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::InvalidBase64`] or [`WireGuardError::InvalidKeyLength`].
    pub fn from_base64(text: &str) -> Result<Self, WireGuardError> {
        decode(text).map(Self)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_base64();
        f.debug_tuple("PublicKey").field(&&text[..8]).finish()
    }
}

impl FromStr for PublicKey {
    type Err = WireGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = WireGuardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_base64(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_base64()
    }
}

/// A gateway or client private key. Never printed by `Debug`.
#[derive(Clone)]
pub struct PrivateKey(KeyBytes);

impl PrivateKey {
    /// Draws a fresh key from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng).to_bytes())
    }

    /// Reads a base64 key from a file such as one written by `wg genkey`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or a key error if its
    /// content is not a base64 key.
    pub fn read_from(path: &Path) -> Result<Self, WireGuardError> {
        Self::from_base64(&fs::read_to_string(path)?)
    }

    /// The matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(*DalekPublic::from(&secret).as_bytes())
    }

    /// Base64 text form, as written to `PrivateKey =` lines.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parses the base64 text form. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WireGuardError::InvalidBase64`] or [`WireGuardError::InvalidKeyLength`].
    pub fn from_base64(text: &str) -> Result<Self, WireGuardError> {
        decode(text).map(Self)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for PrivateKey {}

/// Generates a private key together with its public key.
#[must_use]
pub fn generate_keypair() -> (PrivateKey, PublicKey) {
    let private = PrivateKey::generate();
    let public = private.public_key();
    (private, public)
}
