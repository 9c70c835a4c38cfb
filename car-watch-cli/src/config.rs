//! Configuration loading and parsing

use anyhow::{Context, Result};
use car_watch::{NotifierSpec, TrackerConfig, DEFAULT_NOTIFIER_DIR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from car-watch.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    /// SQLite database shared by all trackers; no persistence when unset
    pub database: Option<PathBuf>,
    #[serde(default = "default_notifier_dir")]
    pub notifier_dir: PathBuf,
}

fn default_notifier_dir() -> PathBuf {
    PathBuf::from(DEFAULT_NOTIFIER_DIR)
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database: None,
            notifier_dir: default_notifier_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VehicleConfig {
    pub vin: String,
    /// JSON recording served in place of the live API
    pub replay: PathBuf,
    #[serde(default)]
    pub notifiers: Vec<NotifierSpec>,
    /// Intervals, location table, volatile fields, regions...
    #[serde(flatten)]
    pub tracking: TrackerConfig,
}

impl AppConfig {
    /// Vehicles to track, narrowed to `vin` when given
    pub fn select_vehicles(&self, vin: Option<&str>) -> Result<Vec<&VehicleConfig>> {
        match vin {
            Some(vin) => {
                let vehicle = self
                    .vehicles
                    .iter()
                    .find(|v| v.vin == vin)
                    .with_context(|| format!("No vehicle with VIN {} in configuration", vin))?;
                Ok(vec![vehicle])
            }
            None => Ok(self.vehicles.iter().collect()),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    for vehicle in &config.vehicles {
        vehicle
            .tracking
            .validate()
            .with_context(|| format!("Invalid tracking settings for {}", vehicle.vin))?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use car_watch::RegionSpec;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [general]
        database = "cars.db"

        [[vehicles]]
        vin = "5YJ3E1EA7JF000001"
        replay = "red-car.json"
        volatile_fields = ["timestamp"]

        [vehicles.intervals]
        driveState = 60
        chargeState = 600

        [[vehicles.regions]]
        type = "circle"
        id = "home"
        lat = 37.46
        lon = -122.17
        radius_km = 0.5

        [[vehicles.regions]]
        type = "rectangle"
        lat1 = 37.0
        lon1 = -123.0
        lat2 = 38.0
        lon2 = -121.0

        [[vehicles.notifiers]]
        program = "notify.sh"
        events = ["ENTER_REGION", "EXIT_REGION"]

        [[vehicles]]
        vin = "5YJ3E1EA7JF000002"
        replay = "blue-car.json"
    "#;

    #[test]
    fn test_config_deserialization() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.general.database, Some(PathBuf::from("cars.db")));
        assert_eq!(config.general.notifier_dir, PathBuf::from("./notifiers"));
        assert_eq!(config.vehicles.len(), 2);

        let red = &config.vehicles[0];
        assert_eq!(red.tracking.intervals.get("driveState"), Some(&60));
        assert_eq!(red.tracking.intervals.len(), 2);
        assert_eq!(red.tracking.volatile_fields.len(), 1);
        assert_eq!(red.tracking.regions.len(), 2);
        assert!(matches!(red.tracking.regions[1], RegionSpec::Rectangle { id: None, .. }));
        assert_eq!(red.notifiers[0].program, "notify.sh");
        assert_eq!(red.notifiers[0].events.len(), 2);

        // Untouched vehicles keep every default
        let blue = &config.vehicles[1];
        assert_eq!(blue.tracking, TrackerConfig::default());
        assert!(blue.notifiers.is_empty());
    }

    #[test]
    fn test_select_vehicles() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.select_vehicles(None).unwrap().len(), 2);

        let selected = config.select_vehicles(Some("5YJ3E1EA7JF000002")).unwrap();
        assert_eq!(selected[0].replay, PathBuf::from("blue-car.json"));

        assert!(config.select_vehicles(Some("NOPE")).is_err());
    }

    #[test]
    fn test_load_config_rejects_bad_interval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[vehicles]]
            vin = "V1"
            replay = "v1.json"

            [vehicles.intervals]
            driveState = 0
            "#
        )
        .unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid tracking settings for V1"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
