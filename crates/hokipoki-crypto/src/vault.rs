//! Token Vault: AES-256-GCM sealed storage for long-lived secrets.
//!
//! The vault key is a 32-byte random value stored once in
//! `<home>/.hokipoki/key.secret` with owner-only permissions, created lazily
//! on first use. Sealed envelopes (`IdentityToken`, `TunnelConfig`, the
//! `ToolCredential` array) are written alongside it as separate files; the
//! vault itself has no notion of what it stores — callers treat it as opaque
//! bytes in, bytes out.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};

use crate::error::CryptoError;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A sealed envelope: `iv(12B) || tag(16B) || ciphertext`.
#[derive(Debug, Clone)]
pub struct Envelope(Vec<u8>);

impl Envelope {
    /// Raw wire bytes, as written to disk.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Wrap already-framed `iv || tag || ciphertext` bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A single symmetric key guarding every sealed blob written to
/// `<home>/.hokipoki/`.
pub struct TokenVault {
    key: Key<Aes256Gcm>,
}

impl std::fmt::Debug for TokenVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVault").field("key", &"[REDACTED]").finish()
    }
}

impl TokenVault {
    /// Open the vault at `<state_dir>/key.secret`, generating the key on
    /// first use. Fails with `KeyUnavailable` if the key file cannot be
    /// created or read.
    pub fn open(state_dir: &Path) -> Result<Self, CryptoError> {
        let key_path = state_dir.join("key.secret");
        let key_bytes = if key_path.exists() {
            read_key_file(&key_path)
                .map_err(|e| CryptoError::KeyUnavailable(e.to_string()))?
        } else {
            let mut bytes = [0u8; KEY_LEN];
            OsRng.fill_bytes(&mut bytes);
            write_key_file(&key_path, &bytes)
                .map_err(|e| CryptoError::KeyUnavailable(e.to_string()))?;
            bytes
        };
        Ok(Self {
            key: *Key::<Aes256Gcm>::from_slice(&key_bytes),
        })
    }

    /// Seal `plaintext` into an `iv || tag || ciphertext` envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let cipher = Aes256Gcm::new(&self.key);
        let mut iv_bytes = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv_bytes);
        let nonce = Nonce::from_slice(&iv_bytes);

        let ciphertext_and_tag = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        // `aes_gcm::encrypt` appends the tag to the end of the ciphertext;
        // the vault's on-disk framing keeps the tag up front instead, right
        // after the iv, so `open` can split fixed-size header from a
        // variable-length ciphertext tail without re-parsing ASN.1 or length
        // prefixes.
        let split_at = ciphertext_and_tag.len() - TAG_LEN;
        let (ciphertext, tag) = ciphertext_and_tag.split_at(split_at);

        let mut framed = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
        framed.extend_from_slice(&iv_bytes);
        framed.extend_from_slice(tag);
        framed.extend_from_slice(ciphertext);
        Ok(Envelope(framed))
    }

    /// Open a sealed envelope, verifying the AEAD tag.
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        let bytes = envelope.as_bytes();
        if bytes.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::IntegrityFailure(
                "envelope too short to contain iv and tag".to_string(),
            ));
        }
        let (iv, rest) = bytes.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut ciphertext_and_tag = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        ciphertext_and_tag.extend_from_slice(ciphertext);
        ciphertext_and_tag.extend_from_slice(tag);

        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Nonce::from_slice(iv);
        cipher
            .decrypt(nonce, ciphertext_and_tag.as_ref())
            .map_err(|_| CryptoError::IntegrityFailure("AEAD tag verification failed".to_string()))
    }

    /// Seal `plaintext` and immediately persist it at `<state_dir>/<name>`.
    pub fn store(&self, state_dir: &Path, name: &str, plaintext: &[u8]) -> Result<(), CryptoError> {
        let envelope = self.seal(plaintext)?;
        std::fs::write(state_dir.join(name), envelope.as_bytes())?;
        Ok(())
    }

    /// Load and open `<state_dir>/<name>`, if present.
    pub fn load(&self, state_dir: &Path, name: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let path = state_dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        self.open(&Envelope::from_bytes(bytes)).map(Some)
    }

    /// Remove `<state_dir>/<name>` if it exists.
    pub fn delete(state_dir: &Path, name: &str) -> Result<(), CryptoError> {
        let path = state_dir.join(name);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CryptoError::IoError(e)),
        }
    }
}

fn write_key_file(path: &Path, bytes: &[u8; KEY_LEN]) -> Result<(), CryptoError> {
    let dir = path.parent().ok_or_else(|| {
        CryptoError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "key path has no parent directory",
        ))
    })?;
    std::fs::create_dir_all(dir)?;
    std::fs::write(path, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

fn read_key_file(path: &Path) -> Result<[u8; KEY_LEN], CryptoError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode != 0o600 {
            return Err(CryptoError::IoError(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("vault key file has insecure permissions: {mode:o} (expected 600)"),
            )));
        }
    }

    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; KEY_LEN];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Path to the vault's key file under a given state directory.
pub fn key_path(state_dir: &Path) -> PathBuf {
    state_dir.join("key.secret")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct TestDir(PathBuf);

    impl TestDir {
        fn new() -> Self {
            Self(std::env::temp_dir().join(format!("hokipoki-vault-test-{}", rand::random::<u64>())))
        }
    }

    impl Drop for TestDir {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.0).ok();
        }
    }

    #[test]
    fn seal_and_open_roundtrip() {
        let dir = TestDir::new();
        let vault = TokenVault::open(&dir.0).unwrap();
        let envelope = vault.seal(b"super secret token").unwrap();
        let opened = vault.open(&envelope).unwrap();
        assert_eq!(opened, b"super secret token");
    }

    #[test]
    fn key_file_created_lazily_with_0600_perms() {
        let dir = TestDir::new();
        assert!(!key_path(&dir.0).exists());
        let _vault = TokenVault::open(&dir.0).unwrap();
        assert!(key_path(&dir.0).exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::metadata(key_path(&dir.0)).unwrap().permissions();
            assert_eq!(perms.mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn reopening_vault_reuses_existing_key() {
        let dir = TestDir::new();
        let vault1 = TokenVault::open(&dir.0).unwrap();
        let envelope = vault1.seal(b"payload").unwrap();

        let vault2 = TokenVault::open(&dir.0).unwrap();
        let opened = vault2.open(&envelope).unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn tampered_ciphertext_fails_integrity_check() {
        let dir = TestDir::new();
        let vault = TokenVault::open(&dir.0).unwrap();
        let envelope = vault.seal(b"payload").unwrap();

        let mut tampered = envelope.as_bytes().to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;

        let result = vault.open(&Envelope::from_bytes(tampered));
        assert!(matches!(result, Err(CryptoError::IntegrityFailure(_))));
    }

    #[test]
    fn store_and_load_named_envelope() {
        let dir = TestDir::new();
        std::fs::create_dir_all(&dir.0).unwrap();
        let vault = TokenVault::open(&dir.0).unwrap();

        vault.store(&dir.0, "tokens.enc", b"[{\"tool\":\"claude\"}]").unwrap();
        let loaded = vault.load(&dir.0, "tokens.enc").unwrap();
        assert_eq!(loaded, Some(b"[{\"tool\":\"claude\"}]".to_vec()));
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = TestDir::new();
        std::fs::create_dir_all(&dir.0).unwrap();
        let vault = TokenVault::open(&dir.0).unwrap();
        assert_eq!(vault.load(&dir.0, "nonexistent.enc").unwrap(), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TestDir::new();
        std::fs::create_dir_all(&dir.0).unwrap();
        let vault = TokenVault::open(&dir.0).unwrap();
        vault.store(&dir.0, "tunnel_config.enc", b"cfg").unwrap();

        TokenVault::delete(&dir.0, "tunnel_config.enc").unwrap();
        assert_eq!(vault.load(&dir.0, "tunnel_config.enc").unwrap(), None);
        // Deleting again must not error.
        TokenVault::delete(&dir.0, "tunnel_config.enc").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn load_rejects_world_readable_key_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TestDir::new();
        let _vault = TokenVault::open(&dir.0).unwrap();
        std::fs::set_permissions(key_path(&dir.0), std::fs::Permissions::from_mode(0o644)).unwrap();

        let result = TokenVault::open(&dir.0);
        assert!(result.is_err());
    }
}
