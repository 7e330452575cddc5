//! HTTP client for the National Water Model forecast APIs.
//!
//! Every forecast payload is converted to the preferred flow unit here, at
//! the network boundary, so nothing downstream sees unconverted series.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde_json::Value;

use crate::config::{Config, TimeoutConfig};
use crate::convert::convert_fragment;
use crate::error::{ForecastError, Result};
use crate::models::{ForecastFragment, ForecastSection, Horizon, ReachInfoResponse, ReachMetadata};
use crate::units::UnitPreference;

/// Request priority, which selects the timeout tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Interactive overview loads (shortest timeout)
    High,
    /// Supplementary loads
    Normal,
    /// Complete and background loads (longest timeout)
    Low,
}

/// Outcome of a supplementary fetch, which never fails outright.
#[derive(Debug, Clone, PartialEq)]
pub enum Supplement<T> {
    Loaded(T),
    /// A default value stands in for data that could not be loaded.
    Degraded { value: T, reason: String },
}

impl<T> Supplement<T> {
    pub fn value(&self) -> &T {
        match self {
            Supplement::Loaded(value) | Supplement::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Supplement::Loaded(value) | Supplement::Degraded { value, .. } => value,
        }
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            Supplement::Loaded(_) => None,
            Supplement::Degraded { reason, .. } => Some(reason),
        }
    }
}

/// National Water Model forecast client
#[derive(Debug, Clone)]
pub struct ForecastClient {
    client: Arc<Client>,
    base_url: String,
    return_period_url: String,
    return_period_api_key: Option<String>,
    timeouts: TimeoutConfig,
    units: UnitPreference,
}

impl ForecastClient {
    /// Creates a client from configuration, converting into `units`
    pub fn new(config: &Config, units: UnitPreference) -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(&config.api.user_agent).build()?;
        Ok(Self::with_client(client, config, units))
    }

    /// Creates a client around an existing `reqwest::Client`
    pub fn with_client(client: Client, config: &Config, units: UnitPreference) -> Self {
        Self {
            client: Arc::new(client),
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            return_period_url: config.api.return_period_url.trim_end_matches('/').to_string(),
            return_period_api_key: config.api.return_period_api_key.clone(),
            timeouts: config.timeouts.clone(),
            units,
        }
    }

    pub fn units(&self) -> &UnitPreference {
        &self.units
    }

    pub fn http_client(&self) -> &Client {
        &self.client
    }

    fn timeout_for(&self, priority: Priority) -> Duration {
        match priority {
            Priority::High => self.timeouts.overview(),
            Priority::Normal => self.timeouts.supplementary(),
            Priority::Low => self.timeouts.complete(),
        }
    }

    /// Makes an HTTP GET request and parses the body as JSON
    async fn make_request(
        &self,
        url: Url,
        timeout: Duration,
        what: &str,
        api_key: Option<&str>,
    ) -> Result<Value> {
        tracing::debug!("GET {} (timeout {:?})", url, timeout);

        let mut request = self.client.get(url.clone()).timeout(timeout);
        if let Some(key) = api_key {
            request = request.header("x-api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ForecastError::from_reqwest(e, url.as_str()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ForecastError::NotFound {
                what: what.to_string(),
            });
        }
        if status.is_server_error() {
            return Err(ForecastError::Unavailable {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ForecastError::Http {
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ForecastError::from_reqwest(e, url.as_str()))
    }

    // ========================================================================
    // Reach info
    // ========================================================================

    /// Fetches static reach metadata. Metadata carries no units.
    pub async fn fetch_reach_info(&self, reach_id: &str, priority: Priority) -> Result<ReachMetadata> {
        tracing::info!("Fetching reach info for {}", reach_id);

        let url = endpoint(&self.base_url, &["reaches", reach_id])?;
        let value = self
            .make_request(url, self.timeout_for(priority), &format!("reach {}", reach_id), None)
            .await?;

        let info: ReachInfoResponse = serde_json::from_value(value).map_err(|e| {
            ForecastError::malformed(format!("reach {} info: {}", reach_id, e))
        })?;
        Ok(info.into_metadata(reach_id))
    }

    // ========================================================================
    // Return periods
    // ========================================================================

    /// Fetches return-period flows (CMS), keyed by recurrence interval in
    /// years. Never fails: any problem yields an empty map.
    pub async fn fetch_return_periods(&self, reach_id: &str) -> BTreeMap<u32, f64> {
        self.fetch_return_periods_outcome(reach_id).await.into_value()
    }

    /// Like [`fetch_return_periods`](Self::fetch_return_periods), but reports
    /// why the result is empty.
    pub async fn fetch_return_periods_outcome(
        &self,
        reach_id: &str,
    ) -> Supplement<BTreeMap<u32, f64>> {
        let request = async {
            let mut url = endpoint(&self.return_period_url, &["return-period"])?;
            url.query_pairs_mut().append_pair("comids", reach_id);
            self.make_request(
                url,
                self.timeouts.supplementary(),
                &format!("return periods for {}", reach_id),
                self.return_period_api_key.as_deref(),
            )
            .await
        };
        let value = match request.await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Return periods unavailable for {}: {}", reach_id, e);
                return Supplement::Degraded {
                    value: BTreeMap::new(),
                    reason: e.to_string(),
                };
            }
        };

        match parse_return_periods(&value) {
            Ok(periods) => {
                tracing::debug!("Loaded {} return periods for {}", periods.len(), reach_id);
                Supplement::Loaded(periods)
            }
            Err(reason) => {
                tracing::warn!("Discarding return periods for {}: {}", reach_id, reason);
                Supplement::Degraded {
                    value: BTreeMap::new(),
                    reason,
                }
            }
        }
    }

    // ========================================================================
    // Forecasts
    // ========================================================================

    /// Fetches one horizon and converts every series in the response to the
    /// preferred unit.
    ///
    /// A requested horizon missing from the response is an empty section. A
    /// malformed requested horizon is an error; other malformed sections are
    /// logged and left empty.
    pub async fn fetch_forecast(
        &self,
        reach_id: &str,
        horizon: Horizon,
        priority: Priority,
    ) -> Result<ForecastFragment> {
        tracing::info!("Fetching {} forecast for {}", horizon, reach_id);

        let mut url = endpoint(&self.base_url, &["reaches", reach_id, "streamflow"])?;
        url.query_pairs_mut().append_pair("series", horizon.api_name());
        let value = self
            .make_request(
                url,
                self.timeout_for(priority),
                &format!("{} forecast for reach {}", horizon, reach_id),
                None,
            )
            .await?;

        let fragment = parse_fragment(&value, horizon)?;
        Ok(convert_fragment(fragment, self.units.get()))
    }

    /// Fetches short, medium and long range concurrently and merges them.
    ///
    /// Each horizon contributes only its own sections, so a failed horizon
    /// leaves its sections empty without touching the others. Fails only when
    /// every horizon fails.
    pub async fn fetch_all_forecasts(&self, reach_id: &str) -> Result<ForecastFragment> {
        self.fetch_all_forecasts_reporting(reach_id)
            .await
            .map(|(merged, _)| merged)
    }

    /// Like [`fetch_all_forecasts`](Self::fetch_all_forecasts), but also
    /// returns the horizons that failed when at least one succeeded.
    pub async fn fetch_all_forecasts_reporting(
        &self,
        reach_id: &str,
    ) -> Result<(ForecastFragment, Vec<(Horizon, ForecastError)>)> {
        let (short, medium, long) = tokio::join!(
            self.fetch_forecast(reach_id, Horizon::ShortRange, Priority::Low),
            self.fetch_forecast(reach_id, Horizon::MediumRange, Priority::Low),
            self.fetch_forecast(reach_id, Horizon::LongRange, Priority::Low),
        );

        let mut merged = ForecastFragment::default();
        let mut failures = Vec::new();
        for (horizon, result) in [
            (Horizon::ShortRange, short),
            (Horizon::MediumRange, medium),
            (Horizon::LongRange, long),
        ] {
            match result {
                Ok(fragment) => merged.merge_from(&fragment, horizon.contributes()),
                Err(e) => {
                    tracing::warn!("{} forecast failed for {}: {}", horizon, reach_id, e);
                    failures.push((horizon, e));
                }
            }
        }

        if failures.len() == Horizon::REQUESTABLE.len() {
            return Err(ForecastError::AllHorizonsFailed { errors: failures });
        }
        Ok((merged, failures))
    }

    /// Fetches reach info and return periods concurrently. Return periods are
    /// attached when any were found.
    pub async fn fetch_reach_with_return_periods(
        &self,
        reach_id: &str,
        priority: Priority,
    ) -> Result<(ReachMetadata, Supplement<BTreeMap<u32, f64>>)> {
        let (info, periods) = tokio::join!(
            self.fetch_reach_info(reach_id, priority),
            self.fetch_return_periods_outcome(reach_id),
        );
        let mut metadata = info?;
        if !periods.value().is_empty() {
            metadata.return_periods = Some(periods.value().clone());
        }
        Ok((metadata, periods))
    }
}

// ============================================================================
// Request URLs
// ============================================================================

/// Append `segments` to `base`, percent-encoding each one so caller input
/// can never add path segments or a query. Empty and dot segments are
/// rejected since they would be dropped or resolved away.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    if segments.iter().any(|s| matches!(*s, "" | "." | "..")) {
        return Err(ForecastError::InvalidUrl {
            url: format!("{}/{}", base, segments.join("/")),
        });
    }
    let invalid = || ForecastError::InvalidUrl {
        url: base.to_string(),
    };
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse every series-bearing section of a streamflow response.
fn parse_fragment(value: &Value, requested: Horizon) -> Result<ForecastFragment> {
    let Some(body) = value.as_object() else {
        return Err(ForecastError::malformed(format!(
            "{} response is not an object",
            requested
        )));
    };

    let mut fragment = ForecastFragment::default();
    for horizon in Horizon::ALL {
        let Some(raw) = body.get(horizon.key()) else {
            continue;
        };
        match ForecastSection::from_value(raw) {
            Ok(section) => fragment.set_section(horizon, section),
            Err(e) if horizon == requested => {
                return Err(ForecastError::malformed(format!("{}: {}", horizon.key(), e)));
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed {} section: {}", horizon.key(), e);
            }
        }
    }
    Ok(fragment)
}

/// Normalize a return-period payload into `year -> flow`.
///
/// Accepts an array of objects or a single object. Keys may be plain years
/// (`"2"`) or prefixed (`"return_period_2"`); identifier keys are ignored.
/// Values may be numbers or numeric strings. Any invalid entry discards the
/// whole payload.
pub fn parse_return_periods(value: &Value) -> std::result::Result<BTreeMap<u32, f64>, String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => return Err("expected an array or object".to_string()),
    };

    let mut periods = BTreeMap::new();
    for item in items {
        let Some(entry) = item.as_object() else {
            return Err("entry is not an object".to_string());
        };
        for (key, raw) in entry {
            if matches!(key.as_str(), "feature_id" | "featureId" | "comid" | "reachId") {
                continue;
            }
            let year = key
                .strip_prefix("return_period_")
                .unwrap_or(key)
                .trim_end_matches("yr")
                .trim_end_matches('_')
                .parse::<u32>()
                .map_err(|_| format!("invalid return-period key '{}'", key))?;
            let flow = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|f| f.is_finite())
            .ok_or_else(|| format!("invalid flow for '{}'", key))?;
            periods.insert(year, flow);
        }
    }
    Ok(periods)
}
