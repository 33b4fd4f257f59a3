use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/barkline.db".into(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Generated and persisted on first run when left empty.
    #[serde(default)]
    pub jwt_secret: String,
}

impl Config {
    /// Load the config file, creating it with defaults (and a fresh JWT
    /// secret) if it does not exist yet.
    pub fn load(path: &str) -> Result<Self> {
        let exists = Path::new(path).exists();
        let mut config: Config = if exists {
            toml::from_str(&fs::read_to_string(path)?)?
        } else {
            Config::default()
        };

        let mut dirty = !exists;
        if config.auth.jwt_secret.trim().is_empty() {
            config.auth.jwt_secret = generate_secret();
            dirty = true;
        }

        if dirty {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, toml::to_string_pretty(&config)?)?;
            harden_secret_file_permissions(path)?;
            tracing::info!("wrote configuration to {path}");
        }

        Ok(config)
    }
}

fn generate_secret() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..64)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

/// The config file holds the JWT secret; keep it owner-readable only.
fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_generates_and_persists_a_secret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("barkline.toml");
        let path_str = path.to_string_lossy().into_owned();

        let config = Config::load(&path_str).expect("load");
        assert_eq!(config.auth.jwt_secret.len(), 64);
        assert!(path.exists());

        // Reloading keeps the generated secret stable.
        let reloaded = Config::load(&path_str).expect("reload");
        assert_eq!(reloaded.auth.jwt_secret, config.auth.jwt_secret);
    }

    #[test]
    fn explicit_values_survive_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("barkline.toml");
        fs::write(
            &path,
            "[server]\nbind_address = \"127.0.0.1:9000\"\n\n[database]\nurl = \"sqlite://./x.db\"\n\n[auth]\njwt_secret = \"fixed-secret\"\n",
        )
        .expect("write");

        let config = Config::load(&path.to_string_lossy()).expect("load");
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
        assert_eq!(config.database.url, "sqlite://./x.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.auth.jwt_secret, "fixed-secret");
    }
}
