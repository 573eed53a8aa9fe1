//! Node configuration loaded from environment variables.
//!
//! Engine settings come from [`EngineConfig::from_env`]; this adds what only
//! the ingress needs.

use std::net::SocketAddr;

use murmur_core::EngineConfig;
use murmur_shared::constants::DEFAULT_HTTP_PORT;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Socket address of the HTTP ingress.
    /// Env: `MURMUR_HTTP_ADDR`
    /// Default: `0.0.0.0:3893`
    pub http_addr: SocketAddr,

    /// Sustained inbound deliveries per second per client.
    /// Env: `MURMUR_INGRESS_RATE`
    /// Default: `5`
    pub ingress_rate: f64,

    /// Inbound delivery burst per client.
    /// Env: `MURMUR_INGRESS_BURST`
    /// Default: `50`
    pub ingress_burst: f64,

    pub engine: EngineConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            ingress_rate: 5.0,
            ingress_burst: 50.0,
            engine: EngineConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let mut config = Self {
            engine: EngineConfig::from_env(),
            ..Self::default()
        };

        if let Ok(addr) = std::env::var("MURMUR_HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid MURMUR_HTTP_ADDR, using default"),
            }
        }

        if let Some(rate) = positive_env("MURMUR_INGRESS_RATE") {
            config.ingress_rate = rate;
        }
        if let Some(burst) = positive_env("MURMUR_INGRESS_BURST") {
            config.ingress_burst = burst;
        }

        config
    }
}

fn positive_env(name: &str) -> Option<f64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<f64>() {
        Ok(v) if v > 0.0 => Some(v),
        _ => {
            tracing::warn!(var = name, value = %raw, "Ignoring non-positive number");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3893).into());
        assert!(config.ingress_burst >= config.ingress_rate);
    }
}
