use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::panel::Timing;

/// The configuration used for running the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port to listen on.
    pub port: u16,

    /// Path prefix candidate serial devices must match,
    /// e.g. `/dev/ttyUSB`.
    pub device_pattern: String,

    /// Seconds a panel may go uncontacted before it is pinged.
    pub healthcheck_interval_secs: u64,

    /// Whether a fault escaping one loop iteration shuts the relay down
    /// (after closing every panel) instead of carrying on.
    pub shutdown_on_fault: bool,

    /// Attempt to open every matching device before serving.
    pub open_all_on_start: bool,

    /// Milliseconds to wait for boot/debug noise when opening a panel.
    pub boot_delay_ms: u64,

    /// Milliseconds to wait for the first response line.
    pub init_delay_ms: u64,

    /// Milliseconds to wait when retrying a silent device once.
    pub retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: crate::server::DEFAULT_PORT,
            device_pattern: "/dev/ttyUSB".into(),
            healthcheck_interval_secs: 120,
            shutdown_on_fault: false,
            open_all_on_start: false,
            boot_delay_ms: 1000,
            init_delay_ms: 100,
            retry_delay_ms: 1000,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    /// Panics if the input is not valid .ron.
    pub fn deserialize(input: &str) -> Self {
        Self::ron().from_str::<Config>(input).unwrap()
    }

    /// An example configuration with the defaults filled in.
    pub fn example() -> Self {
        Self {
            open_all_on_start: true,
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap()
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Self {
        let s = std::fs::read_to_string(p).unwrap();

        Self::deserialize(&s)
    }

    /// How long a panel may go uncontacted.
    pub fn healthcheck_interval(&self) -> Duration {
        Duration::from_secs(self.healthcheck_interval_secs)
    }

    /// The device wait times, as used by [`crate::panel::Panel`].
    pub fn timing(&self) -> Timing {
        Timing {
            boot_delay: Duration::from_millis(self.boot_delay_ms),
            init_delay: Duration::from_millis(self.init_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
