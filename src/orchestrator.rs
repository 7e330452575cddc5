//! Phased forecast loading for one reach.
//!
//! A viewing session moves through `Overview → Supplementary → Complete`
//! and may stop after any phase. Only reach metadata is served from the
//! cache; forecast series are fetched on every load.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::cache::{FileStore, KeyValueStore, MemoryStore, ReachCache};
use crate::client::{ForecastClient, Priority, Supplement};
use crate::config::Config;
use crate::error::Result;
use crate::geocode::{HttpGeocoder, NoGeocoder, ReverseGeocoder};
use crate::models::{
    FlowCategory, ForecastFragment, ForecastResponse, ForecastSeries, Horizon, ReachMetadata,
};
use crate::units::{convert, FlowUnit, UnitPreference};

// ============================================================================
// Load outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Overview,
    Supplementary,
    Complete,
}

/// A supplementary piece of data that could not be loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    ReturnPeriods(String),
    Geocoding(String),
    Horizon { horizon: Horizon, reason: String },
}

impl Degradation {
    pub fn describe(&self) -> String {
        match self {
            Degradation::ReturnPeriods(reason) => format!("return periods unavailable ({})", reason),
            Degradation::Geocoding(reason) => format!("location name unavailable ({})", reason),
            Degradation::Horizon { horizon, reason } => {
                format!("{} forecast unavailable ({})", horizon.label(), reason)
            }
        }
    }
}

/// The response produced by a phase, plus whatever it could not load.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult {
    pub phase: LoadPhase,
    pub response: ForecastResponse,
    pub degraded: Vec<Degradation>,
}

impl PhaseResult {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// What a screen renders for a reach.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Loading,
    Ready(ForecastResponse),
    /// Primary data loaded, some supplementary data did not.
    Partial {
        response: ForecastResponse,
        degraded: Vec<Degradation>,
    },
    /// Primary data failed; `retryable` drives the retry affordance.
    Failed { message: String, retryable: bool },
}

impl LoadState {
    pub fn from_result(result: Result<PhaseResult>) -> Self {
        match result {
            Ok(phase) if phase.is_degraded() => LoadState::Partial {
                response: phase.response,
                degraded: phase.degraded,
            },
            Ok(phase) => LoadState::Ready(phase.response),
            Err(e) => LoadState::Failed {
                message: e.user_message(),
                retryable: e.is_retryable(),
            },
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug, Default)]
struct ComputedValues {
    current_flow: HashMap<(String, FlowUnit), Option<f64>>,
    category: HashMap<(String, FlowUnit), FlowCategory>,
}

/// Coordinates cache, client and geocoder into phased loads.
pub struct ForecastOrchestrator {
    client: ForecastClient,
    cache: ReachCache,
    geocoder: Arc<dyn ReverseGeocoder>,
    computed: Mutex<ComputedValues>,
}

impl ForecastOrchestrator {
    pub fn new(client: ForecastClient, cache: ReachCache, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        Self {
            client,
            cache,
            geocoder,
            computed: Mutex::new(ComputedValues::default()),
        }
    }

    /// Builds the client, cache and geocoder described by `config`.
    pub fn from_config(config: &Config, units: UnitPreference) -> anyhow::Result<Self> {
        let client = ForecastClient::new(config, units)?;

        let store: Arc<dyn KeyValueStore> = match &config.cache.dir {
            Some(dir) => {
                tracing::info!("Persisting reach cache in {}", dir.display());
                Arc::new(FileStore::new(dir))
            }
            None => Arc::new(MemoryStore::new()),
        };
        let cache = ReachCache::with_max_age(store, config.cache_max_age());

        let geocoder: Arc<dyn ReverseGeocoder> = if config.geocoding.enabled {
            Arc::new(HttpGeocoder::new(
                client.http_client().clone(),
                config.geocoding.base_url.clone(),
                config.timeouts.supplementary(),
            ))
        } else {
            Arc::new(NoGeocoder)
        };

        Ok(Self::new(client, cache, geocoder))
    }

    pub fn client(&self) -> &ForecastClient {
        &self.client
    }

    pub fn cache(&self) -> &ReachCache {
        &self.cache
    }

    pub fn units(&self) -> &UnitPreference {
        self.client.units()
    }

    // ------------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------------

    /// Fast first load: cached (or freshly fetched) metadata plus the
    /// short-range forecast.
    ///
    /// On a cache miss the metadata is stored before the forecast request is
    /// made, so geocoded enrichment survives a failed forecast call.
    pub async fn load_overview(&self, reach_id: &str) -> Result<PhaseResult> {
        tracing::info!("Loading overview for reach {}", reach_id);
        let mut degraded = Vec::new();

        let reach = match self.cache.get(reach_id).await {
            Some(mut reach) => {
                if reach.needs_geocoding() && self.enrich_location(&mut reach, &mut degraded).await
                {
                    self.cache.store(&reach).await;
                }
                reach
            }
            None => {
                let mut reach = self.client.fetch_reach_info(reach_id, Priority::High).await?;
                self.enrich_location(&mut reach, &mut degraded).await;
                self.cache.store(&reach).await;
                reach
            }
        };

        let fragment = self
            .client
            .fetch_forecast(reach_id, Horizon::ShortRange, Priority::High)
            .await?;
        let mut forecasts = ForecastFragment::default();
        forecasts.merge_from(&fragment, Horizon::ShortRange.contributes());

        self.invalidate(reach_id);
        Ok(PhaseResult {
            phase: LoadPhase::Overview,
            response: ForecastResponse::new(reach, forecasts),
            degraded,
        })
    }

    /// Adds return periods (when missing) and the medium-range forecast.
    ///
    /// Both fetches run concurrently and are independently best effort; the
    /// input response is always returned, enhanced with whatever succeeded.
    pub async fn load_supplementary(&self, response: ForecastResponse) -> PhaseResult {
        let reach_id = response.reach.reach_id.clone();
        tracing::info!("Loading supplementary data for reach {}", reach_id);

        let needs_return_periods = !response.reach.has_return_periods();
        let return_periods = async {
            if needs_return_periods {
                Some(self.client.fetch_return_periods_outcome(&reach_id).await)
            } else {
                None
            }
        };
        let medium = self
            .client
            .fetch_forecast(&reach_id, Horizon::MediumRange, Priority::Normal);
        let (return_periods, medium) = tokio::join!(return_periods, medium);

        let mut response = response;
        let mut degraded = Vec::new();

        match return_periods {
            Some(Supplement::Loaded(periods)) if !periods.is_empty() => {
                response.reach.return_periods = Some(periods);
                self.cache.store(&response.reach).await;
            }
            Some(Supplement::Degraded { reason, .. }) => {
                degraded.push(Degradation::ReturnPeriods(reason));
            }
            _ => {}
        }

        match medium {
            Ok(fragment) => response
                .forecasts
                .merge_from(&fragment, Horizon::MediumRange.contributes()),
            Err(e) => {
                tracing::warn!("Medium range unavailable for {}: {}", reach_id, e);
                degraded.push(Degradation::Horizon {
                    horizon: Horizon::MediumRange,
                    reason: e.to_string(),
                });
            }
        }

        self.invalidate(&reach_id);
        PhaseResult {
            phase: LoadPhase::Supplementary,
            response,
            degraded,
        }
    }

    /// Overview followed by supplementary, as a list screen would run them.
    pub async fn load_overview_and_supplementary(&self, reach_id: &str) -> Result<PhaseResult> {
        let overview = self.load_overview(reach_id).await?;
        let mut supplementary = self.load_supplementary(overview.response).await;
        let mut degraded = overview.degraded;
        degraded.append(&mut supplementary.degraded);
        supplementary.degraded = degraded;
        Ok(supplementary)
    }

    /// Full load for detail screens: metadata with return periods, then every
    /// forecast horizon fetched fresh.
    pub async fn load_complete(&self, reach_id: &str) -> Result<PhaseResult> {
        tracing::info!("Loading complete forecast for reach {}", reach_id);
        let mut degraded = Vec::new();

        let reach = match self.cache.get(reach_id).await {
            Some(reach) if reach.has_return_periods() => reach,
            Some(mut reach) => {
                let periods = self.client.fetch_return_periods_outcome(reach_id).await;
                if let Some(reason) = periods.degraded_reason() {
                    degraded.push(Degradation::ReturnPeriods(reason.to_string()));
                }
                let periods = periods.into_value();
                if !periods.is_empty() {
                    reach.return_periods = Some(periods);
                    self.cache.store(&reach).await;
                }
                reach
            }
            None => {
                let (mut reach, periods) = self
                    .client
                    .fetch_reach_with_return_periods(reach_id, Priority::Low)
                    .await?;
                if let Some(reason) = periods.degraded_reason() {
                    degraded.push(Degradation::ReturnPeriods(reason.to_string()));
                }
                self.enrich_location(&mut reach, &mut degraded).await;
                self.cache.store(&reach).await;
                reach
            }
        };

        let (forecasts, failures) = self.client.fetch_all_forecasts_reporting(reach_id).await?;
        degraded.extend(failures.into_iter().map(|(horizon, e)| Degradation::Horizon {
            horizon,
            reason: e.to_string(),
        }));

        self.invalidate(reach_id);
        Ok(PhaseResult {
            phase: LoadPhase::Complete,
            response: ForecastResponse::new(reach, forecasts),
            degraded,
        })
    }

    /// Drops the cached metadata and computed values, then runs a complete
    /// load.
    pub async fn force_refresh(&self, reach_id: &str) -> Result<PhaseResult> {
        tracing::info!("Force refreshing reach {}", reach_id);
        self.cache.remove(reach_id).await;
        self.invalidate(reach_id);
        self.load_complete(reach_id).await
    }

    /// Fills in city/state. Returns `true` when the metadata changed.
    async fn enrich_location(
        &self,
        reach: &mut ReachMetadata,
        degraded: &mut Vec<Degradation>,
    ) -> bool {
        match self.geocoder.reverse(reach.latitude, reach.longitude).await {
            Ok(Some(place)) => {
                tracing::debug!(
                    "Reach {} is near {}, {}",
                    reach.reach_id,
                    place.city,
                    place.state
                );
                reach.city = Some(place.city);
                reach.state = Some(place.state);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Reverse geocoding failed for {}: {}", reach.reach_id, e);
                degraded.push(Degradation::Geocoding(e.to_string()));
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Computed values
    // ------------------------------------------------------------------------

    /// Return periods in the preferred unit.
    pub fn return_periods(&self, response: &ForecastResponse) -> Option<BTreeMap<u32, f64>> {
        response.reach.return_periods_in(self.units().get())
    }

    pub fn current_flow(&self, response: &ForecastResponse) -> Option<f64> {
        self.current_flow_at(response, Utc::now())
    }

    /// Current flow in the preferred unit, memoized per reach and unit.
    pub fn current_flow_at(&self, response: &ForecastResponse, now: DateTime<Utc>) -> Option<f64> {
        let unit = self.units().get();
        let key = (response.reach.reach_id.clone(), unit);

        let mut computed = self.computed.lock().unwrap_or_else(|e| e.into_inner());
        *computed
            .current_flow
            .entry(key)
            .or_insert_with(|| compute_current_flow(response, unit, now))
    }

    pub fn flow_category(&self, response: &ForecastResponse) -> FlowCategory {
        self.flow_category_at(response, Utc::now())
    }

    /// Flow category of the current flow, memoized per reach and unit.
    pub fn flow_category_at(&self, response: &ForecastResponse, now: DateTime<Utc>) -> FlowCategory {
        let unit = self.units().get();
        let key = (response.reach.reach_id.clone(), unit);

        if let Some(category) = self
            .computed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .category
            .get(&key)
        {
            return *category;
        }

        let flow = self.current_flow_at(response, now);
        let category = FlowCategory::classify(flow, response.reach.return_periods_in(unit).as_ref());
        self.computed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .category
            .insert(key, category);
        category
    }

    /// Forget every memoized current flow and category.
    pub fn clear_computed_caches(&self) {
        let mut computed = self.computed.lock().unwrap_or_else(|e| e.into_inner());
        computed.current_flow.clear();
        computed.category.clear();
    }

    fn invalidate(&self, reach_id: &str) {
        let mut computed = self.computed.lock().unwrap_or_else(|e| e.into_inner());
        computed.current_flow.retain(|(id, _), _| id != reach_id);
        computed.category.retain(|(id, _), _| id != reach_id);
    }
}

/// Flow nearest to `now`, taken from the first horizon that has data:
/// short range, analysis, medium range, long range.
fn compute_current_flow(
    response: &ForecastResponse,
    unit: FlowUnit,
    now: DateTime<Utc>,
) -> Option<f64> {
    [
        Horizon::ShortRange,
        Horizon::AnalysisAssimilation,
        Horizon::MediumRange,
        Horizon::LongRange,
    ]
    .iter()
    .filter_map(|h| response.section(*h).and_then(|s| s.primary()))
    .find_map(|series| nearest_flow(series, unit, now))
}

fn nearest_flow(series: &ForecastSeries, unit: FlowUnit, now: DateTime<Utc>) -> Option<f64> {
    let point = series
        .valid_points()
        .min_by_key(|p| (p.valid_time - now).num_seconds().abs())?;
    match series.units.flow_unit() {
        Some(source) => Some(convert(point.flow, source, unit)),
        None => Some(point.flow),
    }
}

// ============================================================================
// Tests
// ============================================================================
