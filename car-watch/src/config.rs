//! Tracker configuration types
//!
//! Everything a tracker needs to know about one vehicle besides its
//! collaborators: which tables to poll and how often, where the location
//! lives, which attributes are too noisy to count as a change, the motion
//! threshold, and the geofence regions.

use crate::geo::{Fence, LatLon, Shape, MIN_POLYGON_VERTICES};
use crate::types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Seconds between location samples
pub const LOCATION_SAMPLE_INTERVAL: u64 = 5 * 60;

/// Seconds between samples of the slower-moving tables
pub const FULL_SAMPLE_INTERVAL: u64 = 3 * LOCATION_SAMPLE_INTERVAL;

/// What a tracker does when a notification handler fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPolicy {
    /// Report the failure on the status channel and keep tracking
    #[default]
    Continue,
    /// Treat the failure as fatal for this tracker
    Bail,
}

/// Configuration for one vehicle's tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Poll interval in seconds, per table
    #[serde(default = "default_intervals")]
    pub intervals: BTreeMap<String, u64>,

    /// Table carrying the vehicle position
    #[serde(default = "default_location_table")]
    pub location_table: String,

    #[serde(default = "default_latitude_field")]
    pub latitude_field: String,

    #[serde(default = "default_longitude_field")]
    pub longitude_field: String,

    /// Attributes whose changes alone never trigger persistence
    #[serde(default = "default_volatile_fields")]
    pub volatile_fields: BTreeSet<String>,

    /// Distance between consecutive location samples above which the vehicle is moving
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold_km: f64,

    #[serde(default)]
    pub dispatch_policy: DispatchPolicy,

    #[serde(default)]
    pub regions: Vec<RegionSpec>,
}

fn default_intervals() -> BTreeMap<String, u64> {
    let mut intervals = BTreeMap::new();
    intervals.insert("driveState".to_string(), LOCATION_SAMPLE_INTERVAL);
    for table in ["chargeState", "climateState", "vehicleState", "guiSettings"] {
        intervals.insert(table.to_string(), FULL_SAMPLE_INTERVAL);
    }
    intervals
}

fn default_location_table() -> String {
    "driveState".to_string()
}

fn default_latitude_field() -> String {
    "latitude".to_string()
}

fn default_longitude_field() -> String {
    "longitude".to_string()
}

fn default_volatile_fields() -> BTreeSet<String> {
    ["timestamp", "gps_as_of"].iter().map(|s| s.to_string()).collect()
}

fn default_distance_threshold() -> f64 {
    0.05
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            intervals: default_intervals(),
            location_table: default_location_table(),
            latitude_field: default_latitude_field(),
            longitude_field: default_longitude_field(),
            volatile_fields: default_volatile_fields(),
            distance_threshold_km: default_distance_threshold(),
            dispatch_policy: DispatchPolicy::default(),
            regions: Vec::new(),
        }
    }
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: replace all intervals
    pub fn with_intervals<I, S>(mut self, intervals: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        self.intervals = intervals.into_iter().map(|(t, s)| (t.into(), s)).collect();
        self
    }

    /// Builder method: set one table's interval
    pub fn with_interval(mut self, table: impl Into<String>, secs: u64) -> Self {
        self.intervals.insert(table.into(), secs);
        self
    }

    /// Builder method: set the location table and its coordinate fields
    pub fn with_location_table(
        mut self,
        table: impl Into<String>,
        latitude_field: impl Into<String>,
        longitude_field: impl Into<String>,
    ) -> Self {
        self.location_table = table.into();
        self.latitude_field = latitude_field.into();
        self.longitude_field = longitude_field.into();
        self
    }

    /// Builder method: replace the volatile attribute set
    pub fn with_volatile_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volatile_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method: set the motion threshold
    pub fn with_distance_threshold_km(mut self, km: f64) -> Self {
        self.distance_threshold_km = km;
        self
    }

    /// Builder method: set the notification failure policy
    pub fn with_dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    /// Builder method: add a geofence region
    pub fn add_region(mut self, region: RegionSpec) -> Self {
        self.regions.push(region);
        self
    }

    /// Check the settings that the scheduler and fences do not check themselves
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intervals.is_empty() {
            return Err(ConfigError::NoTables);
        }
        if let Some((table, secs)) = self.intervals.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::InvalidInterval {
                table: table.clone(),
                secs: *secs,
            });
        }
        if !self.intervals.contains_key(&self.location_table) {
            return Err(ConfigError::MissingLocationTable(self.location_table.clone()));
        }
        Ok(())
    }

    /// Build one fence per configured region, in order
    pub fn build_fences(&self) -> Result<Vec<Fence>, ConfigError> {
        self.regions
            .iter()
            .enumerate()
            .map(|(i, region)| region.to_fence(i + 1))
            .collect()
    }
}

/// A geofence region as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegionSpec {
    Circle {
        lat: f64,
        lon: f64,
        radius_km: f64,
        #[serde(default)]
        id: Option<String>,
    },
    Rectangle {
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
        #[serde(default)]
        id: Option<String>,
    },
    Polygon {
        vertices: Vec<(f64, f64)>,
        #[serde(default)]
        id: Option<String>,
    },
}

impl RegionSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            RegionSpec::Circle { .. } => "circle",
            RegionSpec::Rectangle { .. } => "rectangle",
            RegionSpec::Polygon { .. } => "polygon",
        }
    }

    /// Configured id, or `<kind>-<position>` when none was given
    pub fn id_or_default(&self, position: usize) -> String {
        let id = match self {
            RegionSpec::Circle { id, .. } | RegionSpec::Rectangle { id, .. } | RegionSpec::Polygon { id, .. } => id,
        };
        id.clone().unwrap_or_else(|| format!("{}-{}", self.kind(), position))
    }

    /// Validate the region and wrap it in a fresh fence
    pub fn to_fence(&self, position: usize) -> Result<Fence, ConfigError> {
        let id = self.id_or_default(position);
        let invalid = |reason: String| ConfigError::InvalidRegion { id: id.clone(), reason };

        let shape = match self {
            RegionSpec::Circle { lat, lon, radius_km, .. } => {
                let center = checked_point(*lat, *lon).map_err(invalid)?;
                if !radius_km.is_finite() || *radius_km <= 0.0 {
                    return Err(invalid(format!("radius must be positive, got {}", radius_km)));
                }
                Shape::circle(center, *radius_km)
            }
            RegionSpec::Rectangle { lat1, lon1, lat2, lon2, .. } => {
                let corner1 = checked_point(*lat1, *lon1).map_err(invalid)?;
                let corner2 = checked_point(*lat2, *lon2).map_err(invalid)?;
                if corner1.lat == corner2.lat || corner1.lon == corner2.lon {
                    return Err(invalid("rectangle corners must differ in both coordinates".to_string()));
                }
                Shape::rectangle(corner1, corner2)
            }
            RegionSpec::Polygon { vertices, .. } => {
                let points = vertices
                    .iter()
                    .map(|(lat, lon)| checked_point(*lat, *lon))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(invalid)?;
                Shape::polygon(points).ok_or_else(|| {
                    invalid(format!(
                        "polygon needs at least {} vertices, got {}",
                        MIN_POLYGON_VERTICES,
                        vertices.len()
                    ))
                })?
            }
        };

        Ok(Fence::new(id, shape))
    }
}

fn checked_point(lat: f64, lon: f64) -> Result<LatLon, String> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(format!("non-finite coordinate ({}, {})", lat, lon));
    }
    if lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(format!("coordinate out of range ({}, {})", lat, lon));
    }
    Ok(LatLon::new(lat, lon))
}
