//! Password-protected storage for the platform API keys.
//!
//! A [`VaultRecord`] holds the access/secret key pair encrypted with
//! XChaCha20-Poly1305 under a key derived from the user's password with
//! PBKDF2-HMAC-SHA256. The record format version and the iteration count are
//! bound into the associated data, so editing either in the file makes
//! authentication fail instead of silently weakening the derivation.
//!
//! Unlocking never returns partial credentials: every failure (wrong
//! password, damaged field, unsupported parameters) is reported as
//! [`ExportError::Auth`].
use crate::error::{ExportError, Result};
use crate::staging;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const RECORD_VERSION: u32 = 1;
pub const KDF_ALGORITHM: &str = "pbkdf2-sha256";
pub const DEFAULT_ITERATIONS: u32 = 480_000;
/// Records below this count are refused on unlock.
pub const MIN_ITERATIONS: u32 = 1_000;
const MAX_ITERATIONS: u32 = 50_000_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Platform API key pair. Zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub iterations: u32,
}

/// Persisted vault, binary fields base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    pub version: u32,
    pub kdf: KdfParams,
    pub salt: String,
    pub iv: String,
    pub ciphertext: String,
    pub auth_tag: String,
}

/// Encrypt `credentials` under `password` with the default work factor.
pub fn setup(password: &str, credentials: &Credentials) -> Result<VaultRecord> {
    setup_with_params(password, credentials, DEFAULT_ITERATIONS)
}

pub fn setup_with_params(
    password: &str,
    credentials: &Credentials,
    iterations: u32,
) -> Result<VaultRecord> {
    if password.is_empty() {
        return Err(ExportError::WeakPassword);
    }
    if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
        return Err(ExportError::Config(format!(
            "kdf iterations must be between {MIN_ITERATIONS} and {MAX_ITERATIONS}"
        )));
    }

    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt, iterations);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));

    let mut buffer = Zeroizing::new(
        serde_json::to_vec(credentials)
            .map_err(|err| ExportError::Protocol(format!("serialize credentials: {err}")))?,
    );
    let aad = associated_data(RECORD_VERSION, iterations);
    let tag = cipher
        .encrypt_in_place_detached(XNonce::from_slice(&nonce), &aad, buffer.as_mut_slice())
        .map_err(|_| ExportError::Auth("vault encryption failed".to_string()))?;

    Ok(VaultRecord {
        version: RECORD_VERSION,
        kdf: KdfParams {
            algorithm: KDF_ALGORITHM.to_string(),
            iterations,
        },
        salt: STANDARD.encode(salt),
        iv: STANDARD.encode(nonce),
        ciphertext: STANDARD.encode(buffer.as_slice()),
        auth_tag: STANDARD.encode(tag),
    })
}

/// Decrypt the credentials stored in `record`.
pub fn unlock(password: &str, record: &VaultRecord) -> Result<Credentials> {
    if record.version != RECORD_VERSION {
        return Err(auth(format!("unsupported vault version {}", record.version)));
    }
    if record.kdf.algorithm != KDF_ALGORITHM
        || !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&record.kdf.iterations)
    {
        return Err(auth("unsupported key derivation parameters"));
    }

    let salt = decode_field("salt", &record.salt, Some(SALT_LEN))?;
    let nonce = decode_field("iv", &record.iv, Some(NONCE_LEN))?;
    let tag = decode_field("authTag", &record.auth_tag, Some(TAG_LEN))?;
    let mut buffer = Zeroizing::new(decode_field("ciphertext", &record.ciphertext, None)?);

    let key = derive_key(password, &salt, record.kdf.iterations);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
    let aad = associated_data(record.version, record.kdf.iterations);
    cipher
        .decrypt_in_place_detached(
            XNonce::from_slice(&nonce),
            &aad,
            buffer.as_mut_slice(),
            Tag::from_slice(&tag),
        )
        .map_err(|_| auth("wrong password or damaged vault"))?;

    let credentials: Credentials = serde_json::from_slice(buffer.as_slice())
        .map_err(|_| auth("vault contents are not valid credentials"))?;
    tracing::debug!("vault unlocked");
    Ok(credentials)
}

/// Re-encrypt under `new_password`, keeping the record's work factor.
///
/// The input record is not modified; callers persist the returned record
/// only once it exists in full.
pub fn rotate(old_password: &str, new_password: &str, record: &VaultRecord) -> Result<VaultRecord> {
    let credentials = unlock(old_password, record)?;
    setup_with_params(new_password, &credentials, record.kdf.iterations)
}

/// Read the vault file; `None` when it does not exist yet.
pub fn load_record(path: &Path) -> Result<Option<VaultRecord>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ExportError::io(format!("read {}", path.display()), err)),
    };
    let record = serde_json::from_slice(&bytes)
        .map_err(|err| auth(format!("vault file {} is damaged: {err}", path.display())))?;
    Ok(Some(record))
}

pub fn save_record(path: &Path, record: &VaultRecord) -> Result<()> {
    staging::write_json_atomic(path, record)?;
    restrict_permissions(path);
    tracing::info!(path = %path.display(), "vault saved");
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!(path = %path.display(), error = %err, "could not restrict vault permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    key
}

fn associated_data(version: u32, iterations: u32) -> Vec<u8> {
    format!("onshape-export-vault/v{version}/{KDF_ALGORITHM}/{iterations}").into_bytes()
}

fn decode_field(name: &str, value: &str, expected_len: Option<usize>) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(value)
        .map_err(|_| auth(format!("vault field {name} is not valid base64")))?;
    match expected_len {
        Some(len) if bytes.len() != len => Err(auth(format!(
            "vault field {name} has length {}, expected {len}",
            bytes.len()
        ))),
        _ => Ok(bytes),
    }
}

fn auth(message: impl Into<String>) -> ExportError {
    ExportError::Auth(message.into())
}

#[cfg(test)]
#[path = "vault_tests.rs"]
mod tests;
