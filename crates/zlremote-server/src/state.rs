use crate::signaling::{Outbox, RandomCodes, SignalingRouter};
use crate::ws::connections::ConnectionManager;
use anyhow::Context;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use zlremote_media::QualityConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Silence window after which a connection is expired
    pub liveness_timeout: Duration,
    pub sweep_interval: Duration,
    /// Period of the server-side RTT ping
    pub probe_interval: Duration,
    /// Per-connection outbound queue; a full queue counts as a failed send
    pub outbound_queue_capacity: usize,
    /// Run a quality monitor on every connection
    pub adaptive_quality: bool,
    pub quality: QualityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
            liveness_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            probe_interval: Duration::from_secs(5),
            outbound_queue_capacity: 256,
            adaptive_quality: true,
            quality: QualityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // Load from environment variables, falling back to defaults
        let defaults = Config::default();

        let bind_address = std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address);

        let liveness_timeout = Duration::from_secs(env_or(
            "LIVENESS_TIMEOUT_SECS",
            defaults.liveness_timeout.as_secs(),
        )?);
        let sweep_interval = Duration::from_secs(env_or(
            "SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?);
        let probe_interval = Duration::from_secs(env_or(
            "PROBE_INTERVAL_SECS",
            defaults.probe_interval.as_secs(),
        )?);

        let outbound_queue_capacity =
            env_or("OUTBOUND_QUEUE_CAPACITY", defaults.outbound_queue_capacity)?;
        let adaptive_quality = env_or("ADAPTIVE_QUALITY", defaults.adaptive_quality)?;

        let quality = QualityConfig {
            target_fps: env_or("TARGET_FPS", defaults.quality.target_fps)?,
            min_fps: env_or("MIN_FPS", defaults.quality.min_fps)?,
            ..defaults.quality
        };

        let config = Config {
            bind_address,
            liveness_timeout,
            sweep_interval,
            probe_interval,
            outbound_queue_capacity,
            adaptive_quality,
            quality,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.liveness_timeout.is_zero() {
            anyhow::bail!("LIVENESS_TIMEOUT_SECS must be positive");
        }
        if self.sweep_interval.is_zero() {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be positive");
        }
        if self.probe_interval.is_zero() {
            anyhow::bail!("PROBE_INTERVAL_SECS must be positive");
        }
        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("OUTBOUND_QUEUE_CAPACITY must be positive");
        }
        self.quality.validate()?;
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub connections: Arc<ConnectionManager>,
    pub router: Arc<SignalingRouter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let outbox: Arc<dyn Outbox> = connections.clone();
        let router = Arc::new(SignalingRouter::new(outbox, Box::new(RandomCodes)));

        Self {
            config,
            connections,
            router,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address, "0.0.0.0:3001");
        assert_eq!(config.quality.target_fps, 60);
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let config = Config {
            probe_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            outbound_queue_capacity: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_quality_bounds_are_rejected() {
        let mut config = Config::default();
        config.quality.min_fps = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unset_variable_uses_default() {
        let value: u64 = env_or("ZLREMOTE_TEST_SURELY_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
