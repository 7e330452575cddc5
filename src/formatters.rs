use std::collections::BTreeMap;

use crate::models::{FlowCategory, ForecastResponse, ForecastSection, Horizon};
use crate::orchestrator::Degradation;
use crate::units::FlowUnit;

/// Values derived from a response in the preferred unit
pub struct FlowSummary {
    pub unit: FlowUnit,
    pub current_flow: Option<f64>,
    pub category: FlowCategory,
    pub return_periods: Option<BTreeMap<u32, f64>>,
}

/// Formats the reach header and current conditions into a human-readable string
pub fn format_reach_summary(response: &ForecastResponse, summary: &FlowSummary) -> String {
    let reach = &response.reach;
    let mut output = format!(
        "{} (reach {})\nLocation: {}\n",
        reach.display_name(),
        reach.reach_id,
        reach.formatted_location()
    );

    match summary.current_flow {
        Some(flow) => output.push_str(&format!(
            "Current flow: {:.1} {}\n",
            flow,
            summary.unit.symbol()
        )),
        None => output.push_str("Current flow: unavailable\n"),
    }
    output.push_str(&format!("Flow category: {}\n", summary.category.label()));

    if let Some(periods) = summary.return_periods.as_ref().filter(|p| !p.is_empty()) {
        output.push_str("Return periods:\n");
        for (year, flow) in periods {
            output.push_str(&format!(
                "  {}-year: {:.1} {}\n",
                year,
                flow,
                summary.unit.symbol()
            ));
        }
    }
    output
}

/// Formats every loaded horizon of a response
pub fn format_forecast_details(response: &ForecastResponse) -> String {
    let mut output = String::from("\nForecasts:\n");
    for horizon in Horizon::ALL {
        match response.section(horizon) {
            Some(section) if !section.is_empty() => {
                output.push_str(&format_section(horizon, section));
            }
            Some(_) => output.push_str(&format!("  {}: no data\n", horizon.label())),
            None => {}
        }
    }
    output
}

fn format_section(horizon: Horizon, section: &ForecastSection) -> String {
    let Some(primary) = section.primary() else {
        return format!("  {}: no data\n", horizon.label());
    };
    let points: Vec<_> = primary.valid_points().collect();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return format!("  {}: no valid data\n", horizon.label());
    };

    let mut line = format!(
        "  {}: {} points, {} to {}, peak {:.1} {}",
        horizon.label(),
        points.len(),
        first.valid_time.format("%Y-%m-%d %H:%MZ"),
        last.valid_time.format("%Y-%m-%d %H:%MZ"),
        primary.max_flow().unwrap_or_default(),
        primary.units
    );
    let members = section.members().count();
    if members > 0 {
        line.push_str(&format!(" ({} ensemble members)", members));
    }
    line.push('\n');
    line
}

/// Formats the list of supplementary data that could not be loaded
pub fn format_degradations(degraded: &[Degradation]) -> String {
    if degraded.is_empty() {
        return String::new();
    }
    let mut output = String::from("\nPartial data:\n");
    for item in degraded {
        output.push_str(&format!("  - {}\n", item.describe()));
    }
    output
}
