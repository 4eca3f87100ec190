use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Address-keyed wallet collection backed by a single bincode file
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    /// Loads the wallet file at `path`, starting empty when it does not exist yet
    pub fn load(path: impl AsRef<Path>) -> Result<Wallets> {
        let path = path.as_ref().to_path_buf();
        let wallets = if path.exists() {
            let bytes = fs::read(&path)?;
            deserialize(&bytes).map_err(|e| {
                BlockchainError::Wallet(format!("Could not read {}: {e}", path.display()))
            })?
        } else {
            HashMap::new()
        };
        Ok(Wallets { wallets, path })
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        log::debug!(
            "Saved {} wallets to {}",
            self.wallets.len(),
            self.path.display()
        );
        Ok(())
    }
}
