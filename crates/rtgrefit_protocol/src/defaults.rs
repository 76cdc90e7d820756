//! Canonical default values shared by the sync engine and the CLI.

pub const DEFAULT_HOME_DIR_NAME: &str = ".rtgrefit";
pub const HOME_ENV_VAR: &str = "RTGREFIT_HOME";
pub const REMOTE_ENV_VAR: &str = "RTGREFIT_REMOTE";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_LOG_FILTER: &str = "rtgrefit=info,rtgrefit_sync=info";

pub const DEFAULT_FALLBACK_SEED: u64 = 42;
pub const DEFAULT_FALLBACK_UNITS: usize = 6;
/// Every timestamp in the fallback dataset is offset from this instant.
pub const FALLBACK_BASE_TIME: &str = "2024-03-04T07:30:00Z";

pub const STORE_EVENT_CAPACITY: usize = 256;
pub const NOTICE_CAPACITY: usize = 32;

pub const COORDINATE_MIN: f64 = 0.0;
pub const COORDINATE_MAX: f64 = 100.0;

/// UI limit only; the record shape does not enforce it.
pub const MAX_LAYER_PHOTOS: usize = 3;

pub const PHOTO_SET_BEFORE: &str = "before";
pub const PHOTO_SET_AFTER: &str = "after";

pub const STANDARD_TASKS: &[&str] = &[
    "washing",
    "sandblasting",
    "painting",
    "corrosion inspection",
    "quality control",
];

pub const STANDARD_ZONES: &[&str] = &[
    "Spreader",
    "Trolley",
    "Gantry Beam",
    "Sill Beam A",
    "Sill Beam B",
    "Engine House",
];

pub const STANDARD_LAYERS: &[(&str, f64)] = &[
    ("Primer", 80.0),
    ("Intermediate", 120.0),
    ("Topcoat", 60.0),
];
