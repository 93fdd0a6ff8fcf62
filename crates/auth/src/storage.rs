//! The encrypted on-disk token store: a single YAML file keyed by calendar
//! id, optionally wrapped in `age` passphrase encryption.
//!
//! One file, one record per calendar, atomic open-truncate-write discipline,
//! and an `age-encryption.org` magic-byte sniff to decide whether a
//! passphrase is required to read it.

use crate::error::AuthError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// A refreshable OAuth2 token pair, as issued by an authorization-code
/// exchange or a subsequent refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
    pub token_type: String,
}

/// A long-lived, non-refreshable access token (e.g. a CalDAV app password
/// or a static API key), stored alongside the OAuth2 variant so a single
/// record shape covers both auth styles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticAccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

/// One calendar's stored credentials. Exactly one of `oauth2`/`access_token`
/// is normally populated, depending on which auth style the adapter uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarAuth {
    pub calendar_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<StaticAccessToken>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StorageFile {
    #[serde(default)]
    calendars: Vec<CalendarAuth>,
}

/// The magic bytes an `age`-encrypted file begins with.
const AGE_MAGIC: &[u8] = b"age-encryption.org";

/// Port every adapter's token lookup/persistence through: read once per
/// run, write once per successful auth exchange.
pub trait TokenStore: Send + Sync {
    fn read(&self, calendar_id: &str) -> Result<Option<CalendarAuth>, AuthError>;
    fn write(&self, auth: CalendarAuth) -> Result<(), AuthError>;
    fn remove(&self, calendar_id: &str) -> Result<(), AuthError>;
}

/// The only storage backend the config schema currently names
/// (`storage_mode: "yaml"`).
pub struct YamlTokenStore {
    path: PathBuf,
    passphrase: Option<String>,
}

impl YamlTokenStore {
    pub fn new(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self { path: path.into(), passphrase }
    }

    fn read_file(&self) -> Result<StorageFile, AuthError> {
        if !self.path.exists() {
            return Ok(StorageFile::default());
        }

        let raw = std::fs::read(&self.path)?;
        let is_encrypted = raw.starts_with(AGE_MAGIC);

        if is_encrypted && self.passphrase.is_none() {
            return Err(AuthError::EncryptionKeyRequired);
        }

        let plaintext = match (&self.passphrase, is_encrypted) {
            (Some(passphrase), true) => decrypt(passphrase, &raw)?,
            _ => raw,
        };

        Ok(serde_yaml::from_slice(&plaintext)?)
    }

    /// Opens with truncate, writes, closes. If a passphrase is configured,
    /// the file is (re-)written encrypted regardless of whether it was
    /// previously plaintext, so a store gets upgraded the first time a
    /// passphrase is supplied.
    fn write_file(&self, file: &StorageFile) -> Result<(), AuthError> {
        let plaintext = serde_yaml::to_vec(file)?;

        let bytes = match &self.passphrase {
            Some(passphrase) => encrypt(passphrase, &plaintext)?,
            None => plaintext,
        };

        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(&bytes))?;
        Ok(())
    }
}

impl TokenStore for YamlTokenStore {
    fn read(&self, calendar_id: &str) -> Result<Option<CalendarAuth>, AuthError> {
        let file = self.read_file()?;
        Ok(file.calendars.into_iter().find(|c| c.calendar_id == calendar_id))
    }

    fn write(&self, auth: CalendarAuth) -> Result<(), AuthError> {
        let mut file = self.read_file().unwrap_or_default();
        file.calendars.retain(|c| c.calendar_id != auth.calendar_id);
        file.calendars.push(auth);
        self.write_file(&file)
    }

    fn remove(&self, calendar_id: &str) -> Result<(), AuthError> {
        let mut file = self.read_file()?;
        file.calendars.retain(|c| c.calendar_id != calendar_id);
        self.write_file(&file)
    }
}

fn encrypt(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>, AuthError> {
    let encryptor = age::Encryptor::with_user_passphrase(age::secrecy::Secret::new(passphrase.to_owned()));
    let mut encrypted = Vec::new();
    let mut writer =
        encryptor.wrap_output(&mut encrypted).map_err(|e| AuthError::Encrypt(anyhow::anyhow!(e)))?;
    writer.write_all(plaintext).map_err(|e| AuthError::Encrypt(anyhow::anyhow!(e)))?;
    writer.finish().map_err(|e| AuthError::Encrypt(anyhow::anyhow!(e)))?;
    Ok(encrypted)
}

fn decrypt(passphrase: &str, ciphertext: &[u8]) -> Result<Vec<u8>, AuthError> {
    let decryptor = age::Decryptor::new(ciphertext).map_err(|e| AuthError::Decrypt(anyhow::anyhow!(e)))?;
    let age::Decryptor::Passphrase(decryptor) = decryptor else {
        return Err(AuthError::Decrypt(anyhow::anyhow!("token store is not passphrase-encrypted")));
    };

    let mut decrypted = Vec::new();
    let mut reader = decryptor
        .decrypt(&age::secrecy::Secret::new(passphrase.to_owned()), None)
        .map_err(|e| AuthError::Decrypt(anyhow::anyhow!(e)))?;
    reader.read_to_end(&mut decrypted).map_err(|e| AuthError::Decrypt(anyhow::anyhow!(e)))?;
    Ok(decrypted)
}

/// Whether the file at `path` looks `age`-encrypted, without reading the
/// whole thing into memory. Used by the CLI to give a clearer error than
/// "cannot parse YAML" when a passphrase is missing.
pub fn looks_encrypted(path: impl AsRef<Path>) -> std::io::Result<bool> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let mut buf = [0u8; AGE_MAGIC.len()];
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(buf == *AGE_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_auth(calendar_id: &str) -> CalendarAuth {
        CalendarAuth {
            calendar_id: calendar_id.to_string(),
            oauth2: Some(OAuth2Token {
                access_token: "at".to_string(),
                refresh_token: "rt".to_string(),
                expiry: Utc::now(),
                token_type: "Bearer".to_string(),
            }),
            access_token: None,
        }
    }

    #[test]
    fn plaintext_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        let store = YamlTokenStore::new(&path, None);

        store.write(sample_auth("cal-1")).unwrap();
        let read_back = store.read("cal-1").unwrap().unwrap();
        assert_eq!(read_back, sample_auth("cal-1"));
    }

    #[test]
    fn encrypted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        let store = YamlTokenStore::new(&path, Some("correct horse battery staple".to_string()));

        store.write(sample_auth("cal-1")).unwrap();
        assert!(looks_encrypted(&path).unwrap());

        let read_back = store.read("cal-1").unwrap().unwrap();
        assert_eq!(read_back, sample_auth("cal-1"));
    }

    #[test]
    fn missing_key_on_encrypted_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        YamlTokenStore::new(&path, Some("secret".to_string())).write(sample_auth("cal-1")).unwrap();

        let unkeyed = YamlTokenStore::new(&path, None);
        assert!(matches!(unkeyed.read("cal-1"), Err(AuthError::EncryptionKeyRequired)));
    }

    #[test]
    fn remove_drops_only_the_named_calendar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        let store = YamlTokenStore::new(&path, None);
        store.write(sample_auth("keep")).unwrap();
        store.write(sample_auth("drop")).unwrap();

        store.remove("drop").unwrap();

        assert!(store.read("drop").unwrap().is_none());
        assert!(store.read("keep").unwrap().is_some());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.yaml");
        let store = YamlTokenStore::new(&path, None);
        assert!(store.read("anything").unwrap().is_none());
    }
}
