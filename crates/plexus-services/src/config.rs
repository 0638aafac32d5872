use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use plexus_ledger::LedgerConfig;

use crate::alive::AliveConfig;
use crate::allocator::AllocatorConfig;
use crate::error::ConfigError;
use crate::nextip::AddressRange;

/// Configuration of a Plexus node.
///
/// Every field has a default, so a configuration file only lists what it
/// changes. Durations are written as whole seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity on the mesh. A random one is generated when absent.
    pub peer_id: Option<String>,
    /// Interface address and range, e.g. `10.1.0.1/24`. With `dhcp` off this
    /// is the node's own address; with `dhcp` on, the range to allocate from.
    pub address: String,
    /// Obtain the address from the mesh instead of using `address`.
    pub dhcp: bool,
    /// Directory of lease files.
    pub lease_dir: PathBuf,
    /// Per-node secret naming the lease file.
    pub exchange_secret: String,
    /// Shared key sealing ledger traffic; plain frames when absent.
    pub network_key: Option<String>,
    #[serde(with = "secs")]
    pub healthcheck_interval: Duration,
    #[serde(with = "secs")]
    pub scrub_interval: Duration,
    #[serde(with = "secs")]
    pub max_interval: Duration,
    /// Liveness window used by the allocator.
    #[serde(with = "secs")]
    pub dhcp_max_time: Duration,
    #[serde(with = "secs")]
    pub dhcp_poll_interval: Duration,
    #[serde(with = "secs")]
    pub sync_interval: Duration,
    #[serde(with = "secs")]
    pub gc_grace: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            address: "10.1.0.1/24".to_string(),
            dhcp: false,
            lease_dir: default_lease_dir(),
            exchange_secret: String::new(),
            network_key: None,
            healthcheck_interval: Duration::from_secs(30),
            scrub_interval: Duration::from_secs(600),
            max_interval: Duration::from_secs(900),
            dhcp_max_time: Duration::from_secs(900),
            dhcp_poll_interval: Duration::from_secs(5),
            sync_interval: Duration::from_secs(10),
            gc_grace: Duration::from_secs(60),
        }
    }
}

fn default_lease_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".plexus")
        .join("leases")
}

impl NodeConfig {
    /// Read and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the settings for values a node cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.range()?;

        let intervals = [
            ("healthcheck_interval", self.healthcheck_interval),
            ("scrub_interval", self.scrub_interval),
            ("max_interval", self.max_interval),
            ("dhcp_max_time", self.dhcp_max_time),
            ("dhcp_poll_interval", self.dhcp_poll_interval),
            ("sync_interval", self.sync_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.healthcheck_interval >= self.max_interval {
            return Err(ConfigError::Invalid(
                "healthcheck_interval must be shorter than max_interval".into(),
            ));
        }
        if self.dhcp && self.exchange_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "dhcp requires an exchange_secret".into(),
            ));
        }
        Ok(())
    }

    /// The configured address range.
    pub fn range(&self) -> Result<AddressRange, ConfigError> {
        AddressRange::parse(&self.address).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            sync_interval: self.sync_interval,
            gc_grace: self.gc_grace,
        }
    }

    pub fn alive_config(&self) -> AliveConfig {
        AliveConfig {
            healthcheck_interval: self.healthcheck_interval,
            scrub_interval: self.scrub_interval,
            max_interval: self.max_interval,
        }
    }

    pub fn allocator_config(&self) -> Result<AllocatorConfig, ConfigError> {
        Ok(AllocatorConfig {
            max_time: self.dhcp_max_time,
            poll_interval: self.dhcp_poll_interval,
            machine_expiration: self.max_interval,
            ..AllocatorConfig::new(self.range()?, self.exchange_secret.clone())
        })
    }
}

/// Serde adapter writing a `Duration` as seconds: an integer when whole, a
/// float otherwise, so millisecond intervals survive a round trip.
mod secs {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Whole(u64),
        Fractional(f64),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Seconds::deserialize(deserializer)? {
            Seconds::Whole(secs) => Ok(Duration::from_secs(secs)),
            Seconds::Fractional(secs) => Duration::try_from_secs_f64(secs).map_err(D::Error::custom),
        }
    }
}
