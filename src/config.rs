use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::output::PixelFormat;
use crate::pixel_buffer::Geometry;
use crate::protocol::AckPolicy;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub layout: LayoutConfig,
    pub link: LinkConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub host: HostConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct LayoutConfig {
    pub num_strips: usize,
    pub leds_per_strip: usize,
}

impl LayoutConfig {
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.num_strips, self.leds_per_strip)
    }
}

/// The byte pipe between host and driver. Over TCP the driver listens and
/// the host connects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    Serial { port: String, baud_rate: u32 },
    Tcp { host: String, port: u16 },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    pub fps: u32,
    /// Physical LED output. Without one the driver renders to nothing, which
    /// is handy on a bench.
    pub output: Option<OutputConfig>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            fps: 60,
            output: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub port: String,
    pub baud_rate: u32,
    #[serde(default)]
    pub pixel_format: PixelFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Where the host accepts JSON command connections.
    pub listen: ListenConfig,
    pub ack: AckPolicy,
    /// A send still unacknowledged after this long kills the host process.
    pub watchdog_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            listen: ListenConfig::default(),
            ack: AckPolicy::default(),
            watchdog_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            host: "0.0.0.0".to_string(),
            port: 21567,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&data).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.layout.num_strips == 0 || self.layout.leds_per_strip == 0 {
            anyhow::bail!("layout must have at least one strip and one led");
        }
        if self.driver.fps == 0 {
            anyhow::bail!("driver.fps must be positive");
        }
        if self.host.ack.retries == 0 {
            anyhow::bail!("host.ack.retries must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "layout": { "num_strips": 16, "leds_per_strip": 392 },
        "link": { "type": "serial", "port": "/dev/ttyACM0", "baud_rate": 115200 }
    }"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_json(MINIMAL).unwrap();
        assert_eq!(config.layout.geometry(), Geometry::new(16, 392));
        assert_eq!(
            config.link,
            LinkConfig::Serial {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: 115200
            }
        );
        assert_eq!(config.driver.fps, 60);
        assert!(config.driver.output.is_none());
        assert_eq!(config.host.ack, AckPolicy::default());
        assert_eq!(config.host.watchdog_secs, 60);
        assert_eq!(config.host.listen.port, 21567);
    }

    #[test]
    fn test_full_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "layout": {{ "num_strips": 4, "leds_per_strip": 100 }},
                "link": {{ "type": "tcp", "host": "10.0.0.2", "port": 5000 }},
                "driver": {{
                    "fps": 30,
                    "output": {{ "port": "/dev/ttyUSB0", "baud_rate": 921600, "pixel_format": "GRBW" }}
                }},
                "host": {{
                    "listen": {{ "host": "127.0.0.1", "port": 9000 }},
                    "ack": {{ "retries": 10 }},
                    "watchdog_secs": 5
                }}
            }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(
            config.link,
            LinkConfig::Tcp {
                host: "10.0.0.2".to_string(),
                port: 5000
            }
        );
        assert_eq!(config.driver.fps, 30);
        let output = config.driver.output.unwrap();
        assert_eq!(output.pixel_format, PixelFormat::Grbw);
        assert_eq!(config.host.ack.retries, 10);
        assert_eq!(config.host.ack.poll_ms, 50);
        assert_eq!(config.host.watchdog_secs, 5);
    }

    #[test]
    fn test_rejects_empty_layout() {
        let data = MINIMAL.replace("392", "0");
        assert!(Config::from_json(&data).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
