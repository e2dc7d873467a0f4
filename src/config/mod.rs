/// Application configuration module
use crate::domain::{Observer, SsoFlag};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub output_dir: PathBuf,
    pub simbad_url: String,
    pub horizons: HorizonsConfig,
    pub lookup_timeout: Duration,
    pub sampling: SamplingConfig,
    pub sso_flag: SsoFlag,
    pub observer: Observer,
}

#[derive(Clone, Debug)]
pub struct HorizonsConfig {
    pub url: String,
    pub location: String,
    pub max_lines: u64,
}

#[derive(Clone, Debug)]
pub struct SamplingConfig {
    pub step_seconds: u64,
    pub tolerance_seconds: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            step_seconds: 1,
            tolerance_seconds: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:6060".to_string());

        let output_dir = env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./ephemerides"));

        let simbad_url = env::var("SIMBAD_URL")
            .unwrap_or_else(|_| "https://cds.unistra.fr/cgi-bin/nph-sesame/-oI/S".to_string());

        let horizons = HorizonsConfig {
            url: env::var("HORIZONS_URL")
                .unwrap_or_else(|_| "https://ssd.jpl.nasa.gov/api/horizons.api".to_string()),
            location: env::var("HORIZONS_LOCATION").unwrap_or_else(|_| "557".to_string()),
            max_lines: env_u64("HORIZONS_MAX_LINES", 4000),
        };

        let sampling = SamplingConfig {
            step_seconds: env_u64("SAMPLE_STEP_SECONDS", 1).max(1),
            tolerance_seconds: env_u64("COVERAGE_TOLERANCE_SECONDS", 60),
        };

        let sso_flag = match env::var("SSO_FLAG") {
            Ok(raw) => raw
                .parse::<SsoFlag>()
                .map_err(|e| anyhow::anyhow!("SSO_FLAG: {}", e))?,
            Err(_) => SsoFlag::default(),
        };

        let rt2 = Observer::default();
        let observer = Observer {
            latitude: env_f64("OBSERVER_LAT", rt2.latitude),
            longitude: env_f64("OBSERVER_LON", rt2.longitude),
            height_m: env_f64("OBSERVER_HEIGHT_M", rt2.height_m),
        };

        Ok(Self {
            bind_addr,
            output_dir,
            simbad_url,
            horizons,
            lookup_timeout: Duration::from_secs(env_u64("LOOKUP_TIMEOUT_SECONDS", 30)),
            sampling,
            sso_flag,
            observer,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
