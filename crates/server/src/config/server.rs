use serde::Deserialize;

/// HTTP server bind configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum time to wait for the sweeper to finish its current cycle
    /// after the listener stops.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Base URL used when building share links (e.g. `https://drop.example.com`).
    ///
    /// If not set, defaults to `http://{host}:{port}`.
    pub external_url: Option<String>,
}

impl ServerConfig {
    /// The base URL for share links, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.external_url.as_deref().map_or_else(
            || format!("http://{}:{}", self.host, self.port),
            |url| url.trim_end_matches('/').to_owned(),
        )
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            external_url: None,
        }
    }
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}
