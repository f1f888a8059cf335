use serde::Deserialize;

/// Complete configuration for a surge server process.
#[derive(Debug, Clone, Deserialize)]
pub struct SurgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Replication engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interval between server ticks, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Longest client name accepted at join time.
    #[serde(default = "default_max_client_name_len")]
    pub max_client_name_len: usize,
}

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_max_client_name_len() -> usize {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_client_name_len: default_max_client_name_len(),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// WebSocket listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8420".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SurgeConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: SurgeConfig = toml::from_str(&contents)?;
    Ok(config)
}
