//! Circle invitations: sealed circle keys for named recipients.
//!
//! An invitation carries a circle's symmetric key encrypted to the
//! recipient's public key: an ephemeral X25519 exchange feeds a SHA-256
//! KDF, and ChaCha20-Poly1305 authenticates the payload. Decryption with
//! any key other than the matching private key fails.
//!
//! Invitation files live at `.chora/access/<circle_id>/<username>.enc`.

use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::core::error::ChoraError;
use crate::core::time::now_iso;

pub const INVITATION_VERSION: u32 = 1;

const NONCE_LEN: usize = 12;
const PUBLIC_KEY_LEN: usize = 32;

/// An encrypted invitation to a circle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub version: u32,
    pub username: String,
    pub circle_id: String,
    pub encrypted_key_b64: String,
    pub created_at: String,
}

/// Generate a recipient keypair.
pub fn generate_keypair() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

fn derive_key(shared: &[u8]) -> Key {
    let digest = Sha256::digest(shared);
    *Key::from_slice(&digest)
}

/// Seal a circle key for a recipient public key.
///
/// Envelope layout: ephemeral public key (32) || nonce (12) || ciphertext.
pub fn encrypt_circle_key(circle_key: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, ChoraError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);

    let cipher = ChaCha20Poly1305::new(&derive_key(shared.as_bytes()));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), circle_key)
        .map_err(|_| ChoraError::Execution("invitation encryption failed".into()))?;

    let mut blob = Vec::with_capacity(PUBLIC_KEY_LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(ephemeral_public.as_bytes());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a sealed circle key with the matching private key.
pub fn decrypt_circle_key(blob: &[u8], recipient: &StaticSecret) -> Result<Vec<u8>, ChoraError> {
    if blob.len() <= PUBLIC_KEY_LEN + NONCE_LEN {
        return Err(ChoraError::InvalidData("invitation blob truncated".into()));
    }
    let mut ephemeral_bytes = [0u8; PUBLIC_KEY_LEN];
    ephemeral_bytes.copy_from_slice(&blob[..PUBLIC_KEY_LEN]);
    let ephemeral_public = PublicKey::from(ephemeral_bytes);
    let nonce = Nonce::from_slice(&blob[PUBLIC_KEY_LEN..PUBLIC_KEY_LEN + NONCE_LEN]);
    let ciphertext = &blob[PUBLIC_KEY_LEN + NONCE_LEN..];

    let shared = recipient.diffie_hellman(&ephemeral_public);
    let cipher = ChaCha20Poly1305::new(&derive_key(shared.as_bytes()));
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| ChoraError::InvalidData("invitation decryption failed".into()))
}

impl Invitation {
    /// Seal a circle key for a recipient and wrap it in the envelope.
    pub fn create(
        username: &str,
        circle_id: &str,
        circle_key: &[u8],
        recipient: &PublicKey,
    ) -> Result<Invitation, ChoraError> {
        let blob = encrypt_circle_key(circle_key, recipient)?;
        Ok(Invitation {
            version: INVITATION_VERSION,
            username: username.to_string(),
            circle_id: circle_id.to_string(),
            encrypted_key_b64: base64::engine::general_purpose::STANDARD.encode(blob),
            created_at: now_iso(),
        })
    }

    /// Decrypt the carried circle key.
    pub fn accept(&self, recipient: &StaticSecret) -> Result<Vec<u8>, ChoraError> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(&self.encrypted_key_b64)
            .map_err(|e| ChoraError::InvalidData(format!("bad invitation encoding: {}", e)))?;
        decrypt_circle_key(&blob, recipient)
    }

    /// Write to `<access_dir>/<circle_id>/<username>.enc`.
    pub fn to_file(&self, access_dir: &Path) -> Result<PathBuf, ChoraError> {
        let circle_dir = access_dir.join(&self.circle_id);
        std::fs::create_dir_all(&circle_dir)?;
        let path = circle_dir.join(format!("{}.enc", self.username));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn from_file(path: &Path) -> Result<Invitation, ChoraError> {
        let raw = std::fs::read_to_string(path)?;
        let invitation: Invitation = serde_json::from_str(&raw)?;
        if invitation.version != INVITATION_VERSION {
            return Err(ChoraError::InvalidData(format!(
                "unsupported invitation version {}",
                invitation.version
            )));
        }
        Ok(invitation)
    }
}

/// Usernames holding invitations to a circle.
pub fn list_members(access_dir: &Path, circle_id: &str) -> Result<Vec<String>, ChoraError> {
    let circle_dir = access_dir.join(circle_id);
    if !circle_dir.exists() {
        return Ok(Vec::new());
    }
    let mut members = Vec::new();
    for entry in std::fs::read_dir(&circle_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("enc") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                members.push(stem.to_string());
            }
        }
    }
    members.sort();
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_key_round_trips() {
        let (secret, public) = generate_keypair();
        let circle_key = b"circle-key-material-0123456789ab";
        let blob = encrypt_circle_key(circle_key, &public).unwrap();
        assert_eq!(decrypt_circle_key(&blob, &secret).unwrap(), circle_key);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let (_, public) = generate_keypair();
        let (other_secret, _) = generate_keypair();
        let blob = encrypt_circle_key(b"circle-key", &public).unwrap();
        assert!(decrypt_circle_key(&blob, &other_secret).is_err());
    }
}
