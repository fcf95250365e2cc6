use crate::error::{ProxyError, Result};
use serde::Deserialize;
use std::env;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Origin the proxy forwards to, e.g. "https://api.anthropic.com"
    pub origin: String,
}

impl UpstreamConfig {
    /// Host (and port, if any) of the origin, used for the rewritten
    /// `host` request header.
    pub fn host(&self) -> &str {
        let host = self
            .origin
            .strip_prefix("https://")
            .or_else(|| self.origin.strip_prefix("http://"))
            .unwrap_or(&self.origin);
        host.split('/').next().unwrap_or(host)
    }
}

impl ProxyConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let listen_addr =
            env::var("CLAUDE_TAP_LISTEN").unwrap_or_else(|_| "127.0.0.1:8787".to_string());

        let origin = env::var("CLAUDE_TAP_UPSTREAM")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string());

        Ok(ProxyConfig {
            server: ServerConfig { listen_addr },
            upstream: UpstreamConfig { origin },
        })
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: ProxyConfig = toml::from_str(&contents)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config file: {}", e)))?;

        // Allow environment variables to override file config
        if let Ok(listen_addr) = env::var("CLAUDE_TAP_LISTEN") {
            config.server.listen_addr = listen_addr;
        }
        if let Ok(origin) = env::var("CLAUDE_TAP_UPSTREAM") {
            config.upstream.origin = origin;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(ProxyError::Config("Listen address is empty".to_string()));
        }

        if !self.upstream.origin.starts_with("http://")
            && !self.upstream.origin.starts_with("https://")
        {
            return Err(ProxyError::Config(format!(
                "Upstream origin must start with http:// or https://, got: {}",
                self.upstream.origin
            )));
        }

        if self.upstream.host().is_empty() {
            return Err(ProxyError::Config("Upstream host is empty".to_string()));
        }

        Ok(())
    }
}
