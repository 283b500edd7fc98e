//! Control API listener settings

use serde::{Deserialize, Serialize};

/// Where the control API listens and which browsers may call it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Attach a CORS layer (the dashboard is usually served from elsewhere)
    #[serde(default = "enabled")]
    pub cors_enabled: bool,

    /// Origins allowed by the CORS layer; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Trace every request through `tower_http`
    #[serde(default = "enabled")]
    pub request_logging: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: enabled(),
            cors_origins: Vec::new(),
            request_logging: enabled(),
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a browser at `origin` may call the API
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.cors_enabled
            && (self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == origin))
    }
}
