use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::constants::MISSING_FLOW_THRESHOLD;
use crate::units::{convert, FlowUnit, UnitLabel};

// ============================================================================
// Forecast series
// ============================================================================

/// A single timestamped flow reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    #[serde(rename = "validTime")]
    pub valid_time: DateTime<Utc>,
    pub flow: f64,
}

impl ForecastPoint {
    /// `true` when `flow` carries the upstream missing-data sentinel.
    pub fn is_missing(&self) -> bool {
        self.flow <= MISSING_FLOW_THRESHOLD
    }

    pub fn flow_value(&self) -> Option<f64> {
        (!self.is_missing()).then_some(self.flow)
    }
}

/// One forecast trajectory. `units` always describes the scale of `data`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForecastSeries {
    #[serde(default)]
    pub units: UnitLabel,
    #[serde(rename = "referenceTime", default)]
    pub reference_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Vec<ForecastPoint>,
}

impl ForecastSeries {
    /// Points that carry real data, in order.
    pub fn valid_points(&self) -> impl Iterator<Item = &ForecastPoint> {
        self.data.iter().filter(|p| !p.is_missing())
    }

    pub fn max_flow(&self) -> Option<f64> {
        self.valid_points().map(|p| p.flow).reduce(f64::max)
    }
}

/// Series keyed by name (`"series"`, `"mean"`, `"member01"`, ...).
///
/// Deterministic horizons carry a single `"series"` entry; ensemble horizons
/// carry a `"mean"` plus members. An empty section means the horizon had no
/// data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForecastSection(pub BTreeMap<String, ForecastSeries>);

impl ForecastSection {
    /// Parse a section from its raw JSON value.
    ///
    /// `null` yields an empty section. Keys whose values are not series objects
    /// (e.g. `"reach"` echoes) are skipped. An object that is itself a series
    /// is stored under `"series"`.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => return Err(format!("expected object, found {}", json_kind(other))),
        };

        if map.contains_key("data") {
            let series = parse_series(value)?;
            let mut section = Self::default();
            section.0.insert("series".to_string(), series);
            return Ok(section);
        }

        let mut section = Self::default();
        for (name, entry) in map {
            let is_series = entry.as_object().is_some_and(|o| o.contains_key("data"));
            if !is_series {
                continue;
            }
            let series = parse_series(entry).map_err(|e| format!("{}: {}", name, e))?;
            section.0.insert(name.clone(), series);
        }
        Ok(section)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty() || self.0.values().all(|s| s.data.is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&ForecastSeries> {
        self.0.get(name)
    }

    pub fn mean(&self) -> Option<&ForecastSeries> {
        self.0.get("mean")
    }

    /// The series to display by default: `series`, then `mean`, then the
    /// first member.
    pub fn primary(&self) -> Option<&ForecastSeries> {
        self.0
            .get("series")
            .or_else(|| self.0.get("mean"))
            .or_else(|| self.0.values().next())
    }

    pub fn members(&self) -> impl Iterator<Item = (&String, &ForecastSeries)> {
        self.0.iter().filter(|(name, _)| name.starts_with("member"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ForecastSeries)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

fn parse_series(value: &Value) -> Result<ForecastSeries, String> {
    ForecastSeries::deserialize(value).map_err(|e| e.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Horizons
// ============================================================================

/// Forecast horizon categories carried by a forecast response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Horizon {
    AnalysisAssimilation,
    ShortRange,
    MediumRange,
    LongRange,
    MediumRangeBlend,
}

impl Horizon {
    /// Horizons that can be requested from the streamflow endpoint.
    pub const REQUESTABLE: [Horizon; 3] =
        [Horizon::ShortRange, Horizon::MediumRange, Horizon::LongRange];

    pub const ALL: [Horizon; 5] = [
        Horizon::AnalysisAssimilation,
        Horizon::ShortRange,
        Horizon::MediumRange,
        Horizon::LongRange,
        Horizon::MediumRangeBlend,
    ];

    /// Name used in request URLs, e.g. `short_range`
    pub fn api_name(self) -> &'static str {
        match self {
            Horizon::AnalysisAssimilation => "analysis_assimilation",
            Horizon::ShortRange => "short_range",
            Horizon::MediumRange => "medium_range",
            Horizon::LongRange => "long_range",
            Horizon::MediumRangeBlend => "medium_range_blend",
        }
    }

    /// Key used in response bodies, e.g. `shortRange`
    pub fn key(self) -> &'static str {
        match self {
            Horizon::AnalysisAssimilation => "analysisAssimilation",
            Horizon::ShortRange => "shortRange",
            Horizon::MediumRange => "mediumRange",
            Horizon::LongRange => "longRange",
            Horizon::MediumRangeBlend => "mediumRangeBlend",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Horizon::AnalysisAssimilation => "Analysis",
            Horizon::ShortRange => "Short Range",
            Horizon::MediumRange => "Medium Range",
            Horizon::LongRange => "Long Range",
            Horizon::MediumRangeBlend => "Medium Range Blend",
        }
    }

    /// Sections a fetch of this horizon is allowed to contribute.
    pub fn contributes(self) -> &'static [Horizon] {
        match self {
            Horizon::ShortRange => &[Horizon::ShortRange, Horizon::AnalysisAssimilation],
            Horizon::MediumRange => &[Horizon::MediumRange, Horizon::MediumRangeBlend],
            Horizon::LongRange => &[Horizon::LongRange],
            Horizon::AnalysisAssimilation => &[Horizon::AnalysisAssimilation],
            Horizon::MediumRangeBlend => &[Horizon::MediumRangeBlend],
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

// ============================================================================
// Forecast aggregates
// ============================================================================

/// The sections produced by one or more forecast fetches.
///
/// Every horizon is present as a (possibly empty) section except
/// `medium_range_blend`, which is genuinely optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForecastFragment {
    pub analysis_assimilation: ForecastSection,
    pub short_range: ForecastSection,
    pub medium_range: ForecastSection,
    pub long_range: ForecastSection,
    pub medium_range_blend: Option<ForecastSection>,
}

impl ForecastFragment {
    pub fn section(&self, horizon: Horizon) -> Option<&ForecastSection> {
        match horizon {
            Horizon::AnalysisAssimilation => Some(&self.analysis_assimilation),
            Horizon::ShortRange => Some(&self.short_range),
            Horizon::MediumRange => Some(&self.medium_range),
            Horizon::LongRange => Some(&self.long_range),
            Horizon::MediumRangeBlend => self.medium_range_blend.as_ref(),
        }
    }

    pub fn set_section(&mut self, horizon: Horizon, section: ForecastSection) {
        match horizon {
            Horizon::AnalysisAssimilation => self.analysis_assimilation = section,
            Horizon::ShortRange => self.short_range = section,
            Horizon::MediumRange => self.medium_range = section,
            Horizon::LongRange => self.long_range = section,
            Horizon::MediumRangeBlend => self.medium_range_blend = Some(section),
        }
    }

    /// Copy the non-empty sections named in `horizons` from `other`.
    pub fn merge_from(&mut self, other: &ForecastFragment, horizons: &[Horizon]) {
        for &horizon in horizons {
            if let Some(section) = other.section(horizon) {
                if !section.is_empty() {
                    self.set_section(horizon, section.clone());
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        Horizon::ALL
            .iter()
            .all(|h| self.section(*h).map_or(true, |s| s.is_empty()))
    }
}

/// Reach metadata plus every forecast section loaded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResponse {
    pub reach: ReachMetadata,
    pub forecasts: ForecastFragment,
}

impl ForecastResponse {
    pub fn new(reach: ReachMetadata, forecasts: ForecastFragment) -> Self {
        Self { reach, forecasts }
    }

    pub fn section(&self, horizon: Horizon) -> Option<&ForecastSection> {
        self.forecasts.section(horizon)
    }

    pub fn has_horizon(&self, horizon: Horizon) -> bool {
        self.section(horizon).is_some_and(|s| !s.is_empty())
    }
}

// ============================================================================
// Reach metadata
// ============================================================================

/// Static, slow-changing attributes of a river reach.
///
/// Return-period thresholds are stored in CMS. Use
/// [`ReachMetadata::return_periods_in`] to read them in another unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachMetadata {
    pub reach_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub return_periods: Option<BTreeMap<u32, f64>>,
    #[serde(default)]
    pub available_forecasts: Vec<String>,
    #[serde(default)]
    pub upstream_reaches: Vec<String>,
    #[serde(default)]
    pub downstream_reaches: Vec<String>,
}

impl ReachMetadata {
    pub fn needs_geocoding(&self) -> bool {
        self.city.is_none() || self.state.is_none()
    }

    pub fn has_return_periods(&self) -> bool {
        self.return_periods.as_ref().is_some_and(|rp| !rp.is_empty())
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.reach_id
        } else {
            &self.name
        }
    }

    /// "City, ST" when both are known, otherwise coordinates.
    pub fn formatted_location(&self) -> String {
        match (&self.city, &self.state) {
            (Some(city), Some(state)) => format!("{}, {}", city, state),
            _ => format!("{:.4}, {:.4}", self.latitude, self.longitude),
        }
    }

    /// Return periods converted from CMS into `unit`. The stored record is
    /// left untouched.
    pub fn return_periods_in(&self, unit: FlowUnit) -> Option<BTreeMap<u32, f64>> {
        self.return_periods.as_ref().map(|rp| {
            rp.iter()
                .map(|(year, flow)| (*year, convert(*flow, FlowUnit::Cms, unit)))
                .collect()
        })
    }
}

/// A cached `ReachMetadata` with the time it was stored.
///
/// Metadata is nested rather than flattened: serde cannot read integer map
/// keys (return-period years) back through a flattened struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedReachRecord {
    #[serde(rename = "reach")]
    pub metadata: ReachMetadata,
    #[serde(rename = "cachedAt")]
    pub cached_at: DateTime<Utc>,
}

// ============================================================================
// Flow category
// ============================================================================

/// Severity of a flow relative to the reach's return-period thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowCategory {
    /// No current flow or no thresholds to compare against
    Unknown,
    /// Below the 2-year flow
    Normal,
    /// At or above the 2-year flow
    Elevated,
    /// At or above the 5-year flow
    High,
    /// At or above the 10-year flow
    FloodRisk,
}

impl FlowCategory {
    /// Classify `flow` against `return_periods`, both in the same unit.
    pub fn classify(flow: Option<f64>, return_periods: Option<&BTreeMap<u32, f64>>) -> Self {
        let (Some(flow), Some(rp)) = (flow, return_periods) else {
            return FlowCategory::Unknown;
        };
        if rp.is_empty() {
            return FlowCategory::Unknown;
        }
        let at_least = |year: u32| rp.get(&year).is_some_and(|threshold| flow >= *threshold);
        if at_least(10) {
            FlowCategory::FloodRisk
        } else if at_least(5) {
            FlowCategory::High
        } else if at_least(2) {
            FlowCategory::Elevated
        } else {
            FlowCategory::Normal
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FlowCategory::Unknown => "Unknown",
            FlowCategory::Normal => "Normal",
            FlowCategory::Elevated => "Elevated",
            FlowCategory::High => "High",
            FlowCategory::FloodRisk => "Flood Risk",
        }
    }
}

// ============================================================================
// Upstream API models
// ============================================================================

/// `GET /reaches/{id}` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachInfoResponse {
    #[serde(default, deserialize_with = "id_string")]
    pub reach_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub streamflow: Vec<String>,
    #[serde(default)]
    pub route: Option<ReachRoute>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReachRoute {
    #[serde(default)]
    pub upstream: Vec<RouteReach>,
    #[serde(default)]
    pub downstream: Vec<RouteReach>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteReach {
    #[serde(default, deserialize_with = "id_string")]
    pub reach_id: Option<String>,
}

impl ReachInfoResponse {
    pub fn into_metadata(self, requested_id: &str) -> ReachMetadata {
        let route = self.route.unwrap_or_default();
        let ids = |reaches: Vec<RouteReach>| -> Vec<String> {
            reaches.into_iter().filter_map(|r| r.reach_id).collect()
        };
        ReachMetadata {
            reach_id: self.reach_id.unwrap_or_else(|| requested_id.to_string()),
            name: self.name.unwrap_or_default(),
            latitude: self.latitude,
            longitude: self.longitude,
            city: None,
            state: None,
            return_periods: None,
            available_forecasts: self.streamflow,
            upstream_reaches: ids(route.upstream),
            downstream_reaches: ids(route.downstream),
        }
    }
}

/// Reach identifiers arrive as either strings or numbers.
fn id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

// ============================================================================
// MCP Tool Request Models
// ============================================================================

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ReachRequest {
    /// National Water Model reach identifier (feature id)
    pub reach_id: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SetFlowUnitRequest {
    /// "cfs" / "ft³/s" or "cms" / "m³/s"
    pub unit: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(flow: f64) -> ForecastPoint {
        ForecastPoint {
            valid_time: "2024-05-01T12:00:00Z".parse().unwrap(),
            flow,
        }
    }

    #[test]
    fn test_sentinel_flow_is_missing() {
        assert!(point(-9999.0).is_missing());
        assert!(point(-9000.0).is_missing());
        assert_eq!(point(-9999.0).flow_value(), None);
        assert_eq!(point(12.5).flow_value(), Some(12.5));
    }

    #[test]
    fn test_max_flow_ignores_sentinels() {
        let series = ForecastSeries {
            data: vec![point(3.0), point(-999_999.0), point(7.0)],
            ..Default::default()
        };
        assert_eq!(series.max_flow(), Some(7.0));
    }

    #[test]
    fn test_section_from_deterministic_wrapper() {
        let value = json!({
            "series": {
                "units": "ft³/s",
                "referenceTime": "2024-05-01T00:00:00Z",
                "data": [{"validTime": "2024-05-01T01:00:00Z", "flow": 120.0}]
            }
        });
        let section = ForecastSection::from_value(&value).unwrap();
        assert_eq!(section.len(), 1);
        let primary = section.primary().unwrap();
        assert_eq!(primary.units, UnitLabel::Flow(FlowUnit::Cfs));
        assert_eq!(primary.data[0].flow, 120.0);
    }

    #[test]
    fn test_section_from_bare_series_object() {
        let value = json!({
            "units": "m³/s",
            "data": [{"validTime": "2024-05-01T01:00:00Z", "flow": 1.0}]
        });
        let section = ForecastSection::from_value(&value).unwrap();
        assert!(section.get("series").is_some());
    }

    #[test]
    fn test_ensemble_section_keeps_mean_and_members() {
        let series = json!({"units": "cfs", "data": [{"validTime": "2024-05-01T01:00:00Z", "flow": 1.0}]});
        let value = json!({"mean": series, "member01": series, "member02": series, "reach": {"id": 1}});
        let section = ForecastSection::from_value(&value).unwrap();
        assert!(section.mean().is_some());
        assert_eq!(section.members().count(), 2);
        assert_eq!(section.len(), 3);
    }

    #[test]
    fn test_null_section_is_empty() {
        let section = ForecastSection::from_value(&Value::Null).unwrap();
        assert!(section.is_empty());
    }

    #[test]
    fn test_malformed_point_is_an_error() {
        let value = json!({"series": {"units": "cfs", "data": [{"validTime": "soon", "flow": 1.0}]}});
        assert!(ForecastSection::from_value(&value).is_err());
    }

    #[test]
    fn test_merge_only_copies_named_non_empty_sections() {
        let series = json!({"series": {"units": "cfs", "data": [{"validTime": "2024-05-01T01:00:00Z", "flow": 1.0}]}});
        let section = ForecastSection::from_value(&series).unwrap();
        let mut source = ForecastFragment::default();
        source.short_range = section.clone();
        source.long_range = section.clone();

        let mut target = ForecastFragment::default();
        target.merge_from(&source, &[Horizon::ShortRange, Horizon::MediumRange]);
        assert!(!target.short_range.is_empty());
        assert!(target.long_range.is_empty());
        assert!(target.medium_range.is_empty());
        assert!(target.medium_range_blend.is_none());
    }

    #[test]
    fn test_return_periods_converted_on_read_only() {
        let reach = ReachMetadata {
            return_periods: Some(BTreeMap::from([(2, 100.0)])),
            ..Default::default()
        };
        let cfs = reach.return_periods_in(FlowUnit::Cfs).unwrap();
        assert!((cfs[&2] - 3531.47).abs() < 1e-6);
        assert_eq!(reach.return_periods.as_ref().unwrap()[&2], 100.0);
    }

    #[test]
    fn test_flow_category_thresholds() {
        let rp = BTreeMap::from([(2, 100.0), (5, 200.0), (10, 300.0)]);
        assert_eq!(FlowCategory::classify(Some(50.0), Some(&rp)), FlowCategory::Normal);
        assert_eq!(FlowCategory::classify(Some(100.0), Some(&rp)), FlowCategory::Elevated);
        assert_eq!(FlowCategory::classify(Some(250.0), Some(&rp)), FlowCategory::High);
        assert_eq!(FlowCategory::classify(Some(300.0), Some(&rp)), FlowCategory::FloodRisk);
        assert_eq!(FlowCategory::classify(None, Some(&rp)), FlowCategory::Unknown);
        assert_eq!(FlowCategory::classify(Some(1.0), None), FlowCategory::Unknown);
    }

    #[test]
    fn test_cached_record_uses_cached_at_field() {
        let record = CachedReachRecord {
            metadata: ReachMetadata {
                reach_id: "123".to_string(),
                ..Default::default()
            },
            cached_at: "2024-05-01T00:00:00Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["cachedAt"], "2024-05-01T00:00:00Z");
        assert_eq!(json["reach"]["reachId"], "123");
    }

    #[test]
    fn test_reach_info_accepts_numeric_ids() {
        let info: ReachInfoResponse = serde_json::from_value(json!({
            "reachId": 23021904,
            "name": "Illinois River",
            "latitude": 40.55,
            "longitude": -89.65,
            "streamflow": ["short_range"],
            "route": {"upstream": [{"reachId": "1"}], "downstream": [{"reachId": 2}]}
        }))
        .unwrap();
        let meta = info.into_metadata("ignored");
        assert_eq!(meta.reach_id, "23021904");
        assert_eq!(meta.upstream_reaches, vec!["1".to_string()]);
        assert_eq!(meta.downstream_reaches, vec!["2".to_string()]);
    }
}
