/// User agent string for HTTP requests
pub const USER_AGENT: &str = "rivrflow-forecast/0.1.0";

/// NOAA National Water Prediction Service API base URL
pub const NWPS_API_BASE: &str = "https://api.water.noaa.gov/nwps/v1";

/// National Water Model return-period API base URL
pub const RETURN_PERIOD_API_BASE: &str = "https://nwm-api.ciroh.org";

/// Reverse geocoding API base URL
pub const GEOCODE_API_BASE: &str = "https://nominatim.openstreetmap.org";

/// Cubic feet per second in one cubic meter per second
pub const CFS_PER_CMS: f64 = 35.3147;

/// Flow values at or below this are the upstream "missing" sentinel
pub const MISSING_FLOW_THRESHOLD: f64 = -9000.0;

/// Key prefix for persisted reach metadata
pub const REACH_CACHE_PREFIX: &str = "reach_cache_";

/// Reach metadata older than this many days is discarded on read
pub const DEFAULT_CACHE_MAX_AGE_DAYS: i64 = 180;

/// Timeout for interactive overview requests
pub const OVERVIEW_TIMEOUT_SECS: u64 = 10;

/// Timeout for supplementary requests
pub const SUPPLEMENTARY_TIMEOUT_SECS: u64 = 20;

/// Timeout for complete/background requests
pub const COMPLETE_TIMEOUT_SECS: u64 = 30;
