//! Configuration management.

use anyhow::{anyhow, bail, Context, Result};
use sensorhub_core::{Discipline, SensorDescriptor};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Run length in seconds (None = until interrupted)
    #[serde(default)]
    pub duration: Option<u64>,

    /// Interval between aggregator drains in milliseconds
    #[serde(default = "default_drain_interval")]
    pub drain_interval: u64,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Raw sensor tables, validated by [`Config::descriptors`]
    #[serde(default)]
    pub sensors: Vec<toml::Table>,
}

/// Where rendered samples go.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Print samples to stdout
    #[serde(default = "default_console")]
    pub console: bool,

    /// Append samples to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            console: default_console(),
            file: None,
        }
    }
}

fn default_drain_interval() -> u64 {
    100
}

fn default_console() -> bool {
    true
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
        if config.drain_interval == 0 {
            bail!("drain_interval must be greater than zero");
        }
        Ok(config)
    }

    /// Returns the period between drains.
    pub fn drain_period(&self) -> Duration {
        Duration::from_millis(self.drain_interval)
    }

    /// Converts `duration` into a number of drain cycles.
    pub fn run_cycles(&self) -> Option<u64> {
        self.duration
            .map(|secs| secs.saturating_mul(1000) / self.drain_interval)
    }

    /// Returns a descriptor for every valid sensor entry.
    ///
    /// Invalid entries and repeated names are skipped with a warning.
    pub fn descriptors(&self) -> Vec<SensorDescriptor> {
        let mut names = HashSet::new();
        let mut descriptors = Vec::new();

        for (index, table) in self.sensors.iter().enumerate() {
            match parse_sensor(table) {
                Ok(descriptor) => {
                    if !names.insert(descriptor.name.clone()) {
                        warn!(
                            "Skipping sensor {} (counting from 0): duplicate name '{}'",
                            index, descriptor.name
                        );
                        continue;
                    }
                    descriptors.push(descriptor);
                }
                Err(e) => warn!("Skipping sensor {} (counting from 0): {}", index, e),
            }
        }

        descriptors
    }
}

/// Builds a descriptor from one `[[sensors]]` table.
fn parse_sensor(table: &toml::Table) -> Result<SensorDescriptor> {
    let mut name = None;
    let mut interval = None;
    let mut discipline = None;
    let mut attributes = Vec::new();

    for (key, value) in table {
        match key.as_str() {
            "name" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| anyhow!("'name' must be a string"))?;
                name = Some(text.to_string());
            }
            "interval" => {
                let ms = value
                    .as_integer()
                    .ok_or_else(|| anyhow!("'interval' must be an integer"))?;
                if ms <= 0 {
                    bail!("'interval' must be positive, got {}", ms);
                }
                interval = Some(Duration::from_millis(ms as u64));
            }
            "sensor" => {
                let text = value
                    .as_str()
                    .ok_or_else(|| anyhow!("'sensor' must be a string"))?;
                discipline = Some(text.parse::<Discipline>()?);
            }
            _ => {
                let text = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                attributes.push((key.clone(), text));
            }
        }
    }

    let name = name.ok_or_else(|| anyhow!("missing 'name'"))?;
    let interval = interval.ok_or_else(|| anyhow!("missing 'interval'"))?;
    let discipline = discipline.ok_or_else(|| anyhow!("missing 'sensor'"))?;

    let mut descriptor = SensorDescriptor::new(&name, interval, discipline);
    descriptor.attributes.extend(attributes);
    descriptor.validate()?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
duration = 2
drain_interval = 250

[output]
file = "samples.log"

[[sensors]]
name = "A"
interval = 100
sensor = "NonBlocking"
location = "lab"
channel = 3

[[sensors]]
name = "B"
interval = 250
sensor = "blocking"
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.duration, Some(2));
        assert_eq!(config.drain_period(), Duration::from_millis(250));
        assert_eq!(config.run_cycles(), Some(8));
        assert!(config.output.console);
        assert_eq!(config.output.file, Some(PathBuf::from("samples.log")));

        let descriptors = config.descriptors();
        assert_eq!(descriptors.len(), 2);

        let a = &descriptors[0];
        assert_eq!(a.name, "A");
        assert_eq!(a.interval, Duration::from_millis(100));
        assert_eq!(a.discipline, Discipline::NonBlocking);
        assert_eq!(a.attributes.get("location").map(String::as_str), Some("lab"));
        assert_eq!(a.attributes.get("channel").map(String::as_str), Some("3"));

        assert_eq!(descriptors[1].discipline, Discipline::Blocking);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.duration, None);
        assert_eq!(config.drain_interval, 100);
        assert_eq!(config.run_cycles(), None);
        assert!(config.output.console);
        assert!(config.output.file.is_none());
        assert!(config.descriptors().is_empty());
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let content = r#"
[[sensors]]
name = ""
interval = 100
sensor = "blocking"

[[sensors]]
name = "zero"
interval = 0
sensor = "blocking"

[[sensors]]
name = "negative"
interval = -5
sensor = "blocking"

[[sensors]]
name = "unknown"
interval = 100
sensor = "polling"

[[sensors]]
name = "missing"
interval = 100

[[sensors]]
name = "text-interval"
interval = "fast"
sensor = "blocking"

[[sensors]]
name = "ok"
interval = 100
sensor = "non-blocking"

[[sensors]]
name = "ok"
interval = 200
sensor = "blocking"
"#;
        let config = Config::from_toml(content).unwrap();
        let descriptors = config.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "ok");
        assert_eq!(descriptors[0].interval, Duration::from_millis(100));
    }

    #[test]
    fn test_zero_drain_interval_rejected() {
        assert!(Config::from_toml("drain_interval = 0").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("sensorhubd-no-such-config.toml");
        assert!(Config::load(path).is_err());
    }
}
