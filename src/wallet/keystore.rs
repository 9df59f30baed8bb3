use crate::error::{BlockchainError, Result};
use crate::wallet::{Key, PublicKey};
use std::fs;
use std::path::{Path, PathBuf};

const KEY_EXTENSION: &str = "key";
const PUBLIC_EXTENSION: &str = "pub";

/// Named keys on disk: private keys as `<name>.key` under one directory,
/// public keys received out of band as raw `<name>.pub` under another.
pub struct KeyStore {
    keys_dir: PathBuf,
    public_dir: PathBuf,
}

impl KeyStore {
    pub fn open(keys_dir: &Path, public_dir: &Path) -> Result<KeyStore> {
        fs::create_dir_all(keys_dir)?;
        fs::create_dir_all(public_dir)?;
        Ok(KeyStore {
            keys_dir: keys_dir.to_path_buf(),
            public_dir: public_dir.to_path_buf(),
        })
    }

    fn key_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.keys_dir.join(format!("{name}.{KEY_EXTENSION}")))
    }

    fn public_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.public_dir.join(format!("{name}.{PUBLIC_EXTENSION}")))
    }

    /// Generate and store a new key; an existing key of the same name is never overwritten.
    pub fn create(&self, name: &str) -> Result<PublicKey> {
        let path = self.key_path(name)?;
        if path.exists() {
            return Err(BlockchainError::Wallet(format!("Key '{name}' already exists")));
        }
        let key = Key::generate()?;
        key.save(&path)?;
        Ok(key.public())
    }

    pub fn load(&self, name: &str) -> Result<Key> {
        let path = self.key_path(name)?;
        if !path.exists() {
            return Err(BlockchainError::Wallet(format!("No key named '{name}'")));
        }
        Key::load(&path)
    }

    pub fn load_or_create(&self, name: &str) -> Result<Key> {
        let path = self.key_path(name)?;
        if path.exists() {
            return Key::load(&path);
        }
        let key = Key::generate()?;
        key.save(&path)?;
        log::info!("Created new key '{name}' ({})", key.public().fingerprint());
        Ok(key)
    }

    /// Own keys, sorted by name.
    pub fn list(&self) -> Result<Vec<(String, PublicKey)>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.keys_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Key::load(&path) {
                Ok(key) => keys.push((name.to_string(), key.public())),
                Err(e) => log::warn!("Skipping unreadable key file {}: {e}", path.display()),
            }
        }
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keys)
    }

    /// Write the raw public key of `name` to `dest`.
    pub fn export_public(&self, name: &str, dest: &Path) -> Result<PublicKey> {
        let public = self.load(name)?.public();
        fs::write(dest, public.as_bytes())?;
        Ok(public)
    }

    /// Store the raw public key found at `source` under `name`.
    pub fn import_public(&self, name: &str, source: &Path) -> Result<PublicKey> {
        let bytes = fs::read(source)?;
        let public = PublicKey::from_bytes(&bytes)?;
        fs::write(self.public_path(name)?, public.as_bytes())?;
        Ok(public)
    }

    /// Resolve a name to a public key, own keys first, then imported ones.
    pub fn public_key(&self, name: &str) -> Result<PublicKey> {
        if self.key_path(name)?.exists() {
            return Ok(self.load(name)?.public());
        }
        let path = self.public_path(name)?;
        if path.exists() {
            return Ok(PublicKey::from_bytes(&fs::read(path)?)?);
        }
        Err(BlockchainError::Wallet(format!(
            "No key or imported public key named '{name}'"
        )))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BlockchainError::Wallet(format!("Invalid key name '{name}'")))
    }
}
