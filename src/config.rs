use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const IP_API_BATCH: &str = "http://ip-api.com/batch?fields=status,message,lat,lon,query";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub probe: ProbeSettings,
    pub geo: GeoSettings,
    pub globe: GlobeSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub program: String,
    pub args: Vec<String>,     // placed before the target
}

impl Default for ProbeSettings {
    fn default() -> Self {
        let program = if cfg!(windows) { "tracert" } else { "traceroute" };
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoBackend {
    #[default]
    #[serde(rename = "ip-api")]
    IpApi,
    MaxMind,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeoSettings {
    pub backend: GeoBackend,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub cache_capacity: usize,
    pub maxmind_db: Option<PathBuf>,   // GeoLite2-City.mmdb for the maxmind backend
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            backend: GeoBackend::IpApi,
            endpoint: IP_API_BATCH.to_string(),
            timeout_secs: 10,
            cache_capacity: crate::geo::cache::DEFAULT_CAPACITY,
            maxmind_db: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GlobeSettings {
    pub boundaries: Option<PathBuf>,   // blank-line separated "lon,lat" polylines
    pub auto_rotate: f64,              // yaw radians per tick
    pub tick_ms: u64,
    pub initial_pitch_deg: f64,
    pub initial_yaw_deg: f64,
}

impl Default for GlobeSettings {
    fn default() -> Self {
        Self {
            boundaries: None,
            auto_rotate: 0.002,
            tick_ms: 40,
            initial_pitch_deg: 20.0,
            initial_yaw_deg: -30.0,
        }
    }
}

impl Settings {
    /// Load from `path`, or the default location. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("traceglobe")
            .join("config.toml")
    }
}
