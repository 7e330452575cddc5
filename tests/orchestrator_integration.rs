//! Integration tests for phased loading against a mock upstream.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use rivrflow_forecast::{
    Degradation, FlowUnit, ForecastError, ForecastOrchestrator, Horizon, LoadPhase, LoadState,
    MemoryStore, NoGeocoder, Place, ReachCache, ReachMetadata, ReverseGeocoder,
};
use wiremock::{MockServer, ResponseTemplate};

struct FixedGeocoder;

#[async_trait]
impl ReverseGeocoder for FixedGeocoder {
    async fn reverse(&self, _lat: f64, _lon: f64) -> rivrflow_forecast::Result<Option<Place>> {
        Ok(Some(Place {
            city: "Peoria".to_string(),
            state: "IL".to_string(),
        }))
    }
}

struct FailingGeocoder;

#[async_trait]
impl ReverseGeocoder for FailingGeocoder {
    async fn reverse(&self, _lat: f64, _lon: f64) -> rivrflow_forecast::Result<Option<Place>> {
        Err(ForecastError::Network("geocoder offline".to_string()))
    }
}

fn orchestrator(
    server: &MockServer,
    geocoder: Arc<dyn ReverseGeocoder>,
) -> (ForecastOrchestrator, ReachCache) {
    let cache = ReachCache::new(Arc::new(MemoryStore::new()));
    let orch = ForecastOrchestrator::new(client_for(server, FlowUnit::Cfs), cache.clone(), geocoder);
    (orch, cache)
}

async fn mount_short_range(server: &MockServer) {
    mount_horizon(
        server,
        "short_range",
        ResponseTemplate::new(200).set_body_json(short_range_json("cfs", &[120.0, 130.0])),
    )
    .await;
}

// --- Overview ---------------------------------------------------------------

#[tokio::test]
async fn test_overview_on_cache_miss_fetches_and_caches() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    mount_short_range(&server).await;

    let (orch, cache) = orchestrator(&server, Arc::new(FixedGeocoder));
    let result = orch.load_overview(REACH_ID).await.unwrap();

    assert_eq!(result.phase, LoadPhase::Overview);
    assert!(!result.is_degraded());
    assert!(result.response.has_horizon(Horizon::ShortRange));
    assert!(!result.response.has_horizon(Horizon::MediumRange));
    assert_eq!(result.response.reach.city.as_deref(), Some("Peoria"));

    let cached = cache.get(REACH_ID).await.unwrap();
    assert_eq!(cached.state.as_deref(), Some("IL"));
}

#[tokio::test]
async fn test_overview_stores_metadata_before_forecast_fails() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    mount_horizon(&server, "short_range", ResponseTemplate::new(500)).await;

    let (orch, cache) = orchestrator(&server, Arc::new(FixedGeocoder));
    let err = orch.load_overview(REACH_ID).await.unwrap_err();

    assert_eq!(err, ForecastError::Unavailable { status: 500 });
    let cached = cache.get(REACH_ID).await.unwrap();
    assert_eq!(cached.city.as_deref(), Some("Peoria"));
}

#[tokio::test]
async fn test_overview_cache_hit_skips_reach_request() {
    let server = MockServer::start().await;
    mount_reach(&server, 0).await;
    mount_short_range(&server).await;

    let (orch, cache) = orchestrator(&server, Arc::new(NoGeocoder));
    cache
        .store(&ReachMetadata {
            reach_id: REACH_ID.to_string(),
            name: "Cached River".to_string(),
            city: Some("Havana".to_string()),
            state: Some("IL".to_string()),
            ..Default::default()
        })
        .await;

    let result = orch.load_overview(REACH_ID).await.unwrap();
    assert_eq!(result.response.reach.name, "Cached River");
    assert!(result.response.has_horizon(Horizon::ShortRange));
}

#[tokio::test]
async fn test_overview_missing_reach_fails() {
    let server = MockServer::start().await;
    let (orch, _) = orchestrator(&server, Arc::new(NoGeocoder));

    let state = LoadState::from_result(orch.load_overview(REACH_ID).await);
    assert!(matches!(state, LoadState::Failed { retryable: false, .. }));
}

#[tokio::test]
async fn test_geocoding_failure_degrades_but_loads() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    mount_short_range(&server).await;

    let (orch, _) = orchestrator(&server, Arc::new(FailingGeocoder));
    let result = orch.load_overview(REACH_ID).await.unwrap();

    assert!(result.response.reach.city.is_none());
    assert!(matches!(result.degraded[..], [Degradation::Geocoding(_)]));
}

// --- Supplementary ----------------------------------------------------------

#[tokio::test]
async fn test_supplementary_adds_return_periods_and_medium_range() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    mount_short_range(&server).await;
    mount_horizon(
        &server,
        "medium_range",
        ResponseTemplate::new(200).set_body_json(medium_range_json("cfs", &[140.0])),
    )
    .await;
    mount_return_periods(&server, ResponseTemplate::new(200).set_body_json(return_periods_json()))
        .await;

    let (orch, cache) = orchestrator(&server, Arc::new(NoGeocoder));
    let overview = orch.load_overview(REACH_ID).await.unwrap();
    let result = orch.load_supplementary(overview.response).await;

    assert_eq!(result.phase, LoadPhase::Supplementary);
    assert!(!result.is_degraded());
    assert!(result.response.has_horizon(Horizon::ShortRange));
    assert!(result.response.has_horizon(Horizon::MediumRange));
    assert!(result.response.reach.has_return_periods());
    assert!(cache.get(REACH_ID).await.unwrap().has_return_periods());
}

#[tokio::test]
async fn test_supplementary_failures_are_independent() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    mount_short_range(&server).await;
    mount_horizon(&server, "medium_range", ResponseTemplate::new(503)).await;
    mount_return_periods(&server, ResponseTemplate::new(200).set_body_json(return_periods_json()))
        .await;

    let (orch, _) = orchestrator(&server, Arc::new(NoGeocoder));
    let overview = orch.load_overview(REACH_ID).await.unwrap();
    let result = orch.load_supplementary(overview.response).await;

    assert!(result.response.reach.has_return_periods());
    assert!(result.response.has_horizon(Horizon::ShortRange));
    assert!(result.response.forecasts.medium_range.is_empty());
    assert!(matches!(
        result.degraded[..],
        [Degradation::Horizon {
            horizon: Horizon::MediumRange,
            ..
        }]
    ));
}

#[tokio::test]
async fn test_return_period_404_does_not_block_loading() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    mount_short_range(&server).await;
    mount_horizon(
        &server,
        "medium_range",
        ResponseTemplate::new(200).set_body_json(medium_range_json("cfs", &[140.0])),
    )
    .await;

    let (orch, _) = orchestrator(&server, Arc::new(NoGeocoder));
    let result = orch
        .load_overview_and_supplementary(REACH_ID)
        .await
        .unwrap();

    assert!(!result.response.reach.has_return_periods());
    assert!(result.response.has_horizon(Horizon::MediumRange));
    assert!(matches!(
        LoadState::from_result(Ok(result)),
        LoadState::Partial { .. }
    ));
}

// --- Complete ---------------------------------------------------------------

#[tokio::test]
async fn test_complete_loads_every_horizon() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    mount_short_range(&server).await;
    mount_horizon(
        &server,
        "medium_range",
        ResponseTemplate::new(200).set_body_json(medium_range_json("cfs", &[140.0])),
    )
    .await;
    mount_horizon(
        &server,
        "long_range",
        ResponseTemplate::new(200).set_body_json(long_range_json("cfs", &[90.0])),
    )
    .await;
    mount_return_periods(&server, ResponseTemplate::new(200).set_body_json(return_periods_json()))
        .await;

    let (orch, cache) = orchestrator(&server, Arc::new(FixedGeocoder));
    let result = orch.load_complete(REACH_ID).await.unwrap();

    assert_eq!(result.phase, LoadPhase::Complete);
    assert!(!result.is_degraded());
    for horizon in Horizon::ALL {
        assert!(result.response.has_horizon(horizon), "missing {}", horizon);
    }
    let cached = cache.get(REACH_ID).await.unwrap();
    assert!(cached.has_return_periods());
    assert_eq!(cached.city.as_deref(), Some("Peoria"));
}

#[tokio::test]
async fn test_complete_reports_failed_horizons() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    mount_short_range(&server).await;
    mount_return_periods(&server, ResponseTemplate::new(200).set_body_json(return_periods_json()))
        .await;

    let (orch, _) = orchestrator(&server, Arc::new(NoGeocoder));
    let result = orch.load_complete(REACH_ID).await.unwrap();

    assert!(result.response.has_horizon(Horizon::ShortRange));
    assert!(result.response.forecasts.medium_range.is_empty());
    assert!(result.response.forecasts.long_range.is_empty());
    assert_eq!(result.degraded.len(), 2);
}

#[tokio::test]
async fn test_complete_fails_when_no_horizon_loads() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;

    let (orch, _) = orchestrator(&server, Arc::new(NoGeocoder));
    let err = orch.load_complete(REACH_ID).await.unwrap_err();
    assert!(matches!(err, ForecastError::AllHorizonsFailed { .. }));
    // Every horizon answered 404, so retrying cannot help.
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
    let server = MockServer::start().await;
    // Once for the first complete load, once more after the refresh drops
    // the cached entry.
    mount_reach(&server, 2).await;
    mount_short_range(&server).await;
    mount_return_periods(&server, ResponseTemplate::new(200).set_body_json(return_periods_json()))
        .await;

    let (orch, _) = orchestrator(&server, Arc::new(NoGeocoder));
    orch.load_complete(REACH_ID).await.unwrap();
    // Served from cache: no extra reach request.
    orch.load_complete(REACH_ID).await.unwrap();
    let result = orch.force_refresh(REACH_ID).await.unwrap();
    assert!(result.response.has_horizon(Horizon::ShortRange));
}

// --- Computed values --------------------------------------------------------

#[tokio::test]
async fn test_flow_category_from_loaded_data() {
    let server = MockServer::start().await;
    mount_reach(&server, 1).await;
    // 5000 cfs is about 141.6 cms: above the 2-year (100) but below the
    // 5-year (200) return period.
    mount_horizon(
        &server,
        "short_range",
        ResponseTemplate::new(200).set_body_json(short_range_json("cfs", &[5000.0])),
    )
    .await;
    mount_return_periods(&server, ResponseTemplate::new(200).set_body_json(return_periods_json()))
        .await;

    let (orch, _) = orchestrator(&server, Arc::new(NoGeocoder));
    let result = orch.load_complete(REACH_ID).await.unwrap();

    assert_eq!(orch.current_flow(&result.response), Some(5000.0));
    assert_eq!(
        orch.flow_category(&result.response),
        rivrflow_forecast::FlowCategory::Elevated
    );
}
