//! Unit conversion of forecast series, sections and fragments.
//!
//! Missing-data sentinels (`flow <= -9000`) pass through unconverted, so the
//! sentinel threshold stays meaningful in either unit.

use std::collections::BTreeMap;

use crate::error::ConversionError;
use crate::models::{ForecastFragment, ForecastPoint, ForecastSection, ForecastSeries, Horizon};
use crate::units::{convert, FlowUnit, UnitLabel};

/// Convert one series to `target`.
///
/// Returns the input unchanged when it is already in `target`, which is what
/// keeps repeated conversion from scaling the data twice.
pub fn convert_series(
    series: ForecastSeries,
    target: FlowUnit,
) -> Result<ForecastSeries, ConversionError> {
    let source = match &series.units {
        UnitLabel::Flow(unit) => *unit,
        UnitLabel::Unrecognized(token) => {
            return Err(ConversionError::UnrecognizedUnit(token.clone()))
        }
    };
    if source == target {
        return Ok(series);
    }

    let data = series
        .data
        .into_iter()
        .map(|point| {
            if point.is_missing() {
                point
            } else {
                ForecastPoint {
                    flow: convert(point.flow, source, target),
                    ..point
                }
            }
        })
        .collect();

    Ok(ForecastSeries {
        units: UnitLabel::Flow(target),
        reference_time: series.reference_time,
        data,
    })
}

/// Convert every series of a section against the same target.
///
/// Best effort: if any member cannot be converted the whole section is
/// returned unconverted so its members never disagree on units.
pub fn convert_section(section: ForecastSection, target: FlowUnit) -> ForecastSection {
    let converted: Result<BTreeMap<String, ForecastSeries>, (String, ConversionError)> = section
        .0
        .iter()
        .map(|(name, series)| {
            convert_series(series.clone(), target)
                .map(|series| (name.clone(), series))
                .map_err(|e| (name.clone(), e))
        })
        .collect();

    match converted {
        Ok(series) => ForecastSection(series),
        Err((name, e)) => {
            tracing::warn!(
                "Failed to convert series '{}' to {}: {}; keeping source units",
                name,
                target,
                e
            );
            section
        }
    }
}

/// Convert every series-bearing section of a fragment.
pub fn convert_fragment(fragment: ForecastFragment, target: FlowUnit) -> ForecastFragment {
    let mut converted = ForecastFragment::default();
    for horizon in Horizon::ALL {
        if let Some(section) = fragment.section(horizon) {
            converted.set_section(horizon, convert_section(section.clone(), target));
        }
    }
    converted
}
