//! Configuration management for Strata
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files: the socket path, the client identity space, the
//! client-to-plane mapping and the optional pacing acknowledgement.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::compositor::MAX_PLANES;

/// Main configuration struct containing all Strata settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrataConfig {
    /// Filesystem path of the listening socket
    #[serde(default = "StrataConfig::default_socket_path")]
    pub socket_path: PathBuf,

    /// Number of configured client identities
    #[serde(default = "StrataConfig::default_max_clients")]
    pub max_clients: usize,

    /// Hardware plane index driven by each client identity; one entry per
    /// identity, fixed at startup
    #[serde(default = "StrataConfig::default_client_planes")]
    pub client_planes: Vec<usize>,

    /// Stacking order assigned to discovered planes at startup, by plane
    /// index (missing entries keep the default of 0)
    #[serde(default)]
    pub plane_zpos: Vec<u64>,

    /// Send a 4-byte frame sequence number to every identified client
    /// after each commit (client-side pacing)
    #[serde(default)]
    pub ack_clients: bool,

    /// DRM device node to open instead of scanning /dev/dri
    #[serde(default)]
    pub device: Option<PathBuf>,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            socket_path: Self::default_socket_path(),
            max_clients: Self::default_max_clients(),
            client_planes: Self::default_client_planes(),
            plane_zpos: Vec::new(),
            ack_clients: false,
            device: None,
        }
    }
}

impl StrataConfig {
    fn default_socket_path() -> PathBuf {
        PathBuf::from("/run/strata.sock")
    }

    fn default_max_clients() -> usize {
        2
    }

    fn default_client_planes() -> Vec<usize> {
        vec![0, 1]
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: StrataConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check internal consistency before the configuration is acted on
    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            bail!("max_clients must be at least 1");
        }
        if self.client_planes.len() != self.max_clients {
            bail!(
                "client_planes has {} entries but max_clients is {}",
                self.client_planes.len(),
                self.max_clients
            );
        }
        if let Some(&plane) = self.client_planes.iter().find(|&&p| p >= MAX_PLANES) {
            bail!("client_planes references plane {plane}, supported maximum is {MAX_PLANES}");
        }
        if self.plane_zpos.len() > MAX_PLANES {
            bail!(
                "plane_zpos has {} entries, supported maximum is {MAX_PLANES}",
                self.plane_zpos.len()
            );
        }
        if self.socket_path.as_os_str().is_empty() {
            bail!("socket_path must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
