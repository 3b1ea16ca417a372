use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::models::settings::Settings;

pub const TOKEN_ENV_VAR: &str = "DROPWATCH_AUTH_TOKEN";
const DROPS_TOKEN_FILE_NAME: &str = ".twitch_drops_token";
const TOKEN_FILE_KEY: &str = "DropwatchDropsKey";

#[derive(Debug, Deserialize, Serialize, Clone)]
struct StorableDropsToken {
    access_token: String,
}

pub struct DropsAuthService;

impl DropsAuthService {
    /// Config directory for dropwatch, created on demand.
    pub fn app_config_dir() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("dropwatch");

        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        Ok(path)
    }

    fn get_token_file_path() -> Result<PathBuf> {
        Ok(Self::app_config_dir()?.join(DROPS_TOKEN_FILE_NAME))
    }

    /// Environment variable first, then settings, then the token file.
    pub fn get_token(settings: &Settings) -> Result<String> {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                debug!("[DROPS_AUTH] Using token from {}", TOKEN_ENV_VAR);
                return Ok(token.trim().to_string());
            }
        }

        if let Some(token) = settings.auth_token.as_ref().filter(|t| !t.trim().is_empty()) {
            debug!("[DROPS_AUTH] Using token from settings");
            return Ok(token.trim().to_string());
        }

        let path = Self::get_token_file_path()?;
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "No drops token found: set {} or create {:?}",
                TOKEN_ENV_VAR,
                path
            ));
        }

        let encrypted = fs::read(&path)?;
        let stored = Self::decode_token_file(&encrypted)?;
        debug!("[DROPS_AUTH] Loaded token from file: {:?}", path);
        Ok(stored.access_token)
    }

    fn decode_token_file(encrypted: &[u8]) -> Result<StorableDropsToken> {
        // Simple XOR obfuscation with a fixed key
        let decrypted: Vec<u8> = encrypted
            .iter()
            .zip(TOKEN_FILE_KEY.bytes().cycle())
            .map(|(a, b)| a ^ b)
            .collect();
        let token: StorableDropsToken = serde_json::from_slice(&decrypted)?;
        Ok(token)
    }

    #[cfg(test)]
    fn encode_token_file(token: &StorableDropsToken) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(token)?;
        Ok(json
            .iter()
            .zip(TOKEN_FILE_KEY.bytes().cycle())
            .map(|(a, b)| a ^ b)
            .collect())
    }
}
