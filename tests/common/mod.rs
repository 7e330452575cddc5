//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use rivrflow_forecast::{Config, FlowUnit, ForecastClient, UnitPreference};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REACH_ID: &str = "23021904";

/// Config pointing every upstream API at the mock server.
pub fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.api.base_url = server.uri();
    config.api.return_period_url = server.uri();
    config.geocoding.enabled = false;
    config
}

pub fn client_for(server: &MockServer, unit: FlowUnit) -> ForecastClient {
    ForecastClient::new(&config_for(server), UnitPreference::new(unit)).unwrap()
}

/// A series object as served by the streamflow endpoint.
pub fn series_json(units: &str, flows: &[f64]) -> Value {
    let data: Vec<Value> = flows
        .iter()
        .enumerate()
        .map(|(i, flow)| {
            json!({
                "validTime": format!("2024-05-01T{:02}:00:00Z", i),
                "flow": flow
            })
        })
        .collect();
    json!({
        "units": units,
        "referenceTime": "2024-05-01T00:00:00Z",
        "data": data
    })
}

pub fn reach_json() -> Value {
    json!({
        "reachId": REACH_ID,
        "name": "Illinois River",
        "latitude": 40.55,
        "longitude": -89.65,
        "streamflow": ["analysis_assimilation", "short_range", "medium_range", "long_range"],
        "route": {
            "upstream": [{"reachId": "23021900"}],
            "downstream": [{"reachId": "23021910"}]
        }
    })
}

pub fn short_range_json(units: &str, flows: &[f64]) -> Value {
    json!({
        "reach": {"reachId": REACH_ID},
        "analysisAssimilation": {"series": series_json(units, flows)},
        "shortRange": {"series": series_json(units, flows)},
        "mediumRange": {},
        "longRange": {}
    })
}

pub fn medium_range_json(units: &str, flows: &[f64]) -> Value {
    json!({
        "reach": {"reachId": REACH_ID},
        "mediumRange": {
            "mean": series_json(units, flows),
            "member1": series_json(units, flows),
            "member2": series_json(units, flows)
        },
        "mediumRangeBlend": {"series": series_json(units, flows)}
    })
}

pub fn long_range_json(units: &str, flows: &[f64]) -> Value {
    json!({
        "reach": {"reachId": REACH_ID},
        "longRange": {
            "mean": series_json(units, flows),
            "member1": series_json(units, flows)
        }
    })
}

pub async fn mount_reach(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/reaches/{}", REACH_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(reach_json()))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub async fn mount_horizon(server: &MockServer, series: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/reaches/{}/streamflow", REACH_ID)))
        .and(query_param("series", series))
        .respond_with(response)
        .mount(server)
        .await;
}

pub async fn mount_return_periods(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/return-period"))
        .and(query_param("comids", REACH_ID))
        .respond_with(response)
        .mount(server)
        .await;
}

pub fn return_periods_json() -> Value {
    json!([{
        "feature_id": 23021904,
        "return_period_2": 100.0,
        "return_period_5": 200.0,
        "return_period_10": 300.0,
        "return_period_25": 400.0
    }])
}
