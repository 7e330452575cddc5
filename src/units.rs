//! Flow-rate units, conversion between them, and the user's preferred unit.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::constants::CFS_PER_CMS;

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

/// A flow-rate unit understood by the converter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowUnit {
    /// Cubic feet per second
    #[default]
    #[serde(rename = "CFS")]
    Cfs,
    /// Cubic meters per second
    #[serde(rename = "CMS")]
    Cms,
}

impl FlowUnit {
    /// Short code, e.g. `"CFS"`
    pub fn code(self) -> &'static str {
        match self {
            FlowUnit::Cfs => "CFS",
            FlowUnit::Cms => "CMS",
        }
    }

    /// Display symbol, e.g. `"ft³/s"`
    pub fn symbol(self) -> &'static str {
        match self {
            FlowUnit::Cfs => "ft³/s",
            FlowUnit::Cms => "m³/s",
        }
    }

    /// Parse a unit token, returning `None` for anything unrecognized.
    pub fn parse(token: &str) -> Option<FlowUnit> {
        match token.trim().to_lowercase().as_str() {
            "cfs" | "ft³/s" | "ft3/s" | "ft^3/s" => Some(FlowUnit::Cfs),
            "cms" | "m³/s" | "m3/s" | "m^3/s" => Some(FlowUnit::Cms),
            _ => None,
        }
    }
}

impl fmt::Display for FlowUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The unit tag carried by a parsed series.
///
/// Upstream responses occasionally carry tokens the converter does not know.
/// Those are kept (upper-cased) rather than rejected, so the series can still
/// be displayed in its source unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UnitLabel {
    Flow(FlowUnit),
    Unrecognized(String),
}

impl UnitLabel {
    pub fn flow_unit(&self) -> Option<FlowUnit> {
        match self {
            UnitLabel::Flow(unit) => Some(*unit),
            UnitLabel::Unrecognized(_) => None,
        }
    }
}

impl Default for UnitLabel {
    fn default() -> Self {
        UnitLabel::Flow(FlowUnit::default())
    }
}

impl From<FlowUnit> for UnitLabel {
    fn from(unit: FlowUnit) -> Self {
        UnitLabel::Flow(unit)
    }
}

impl From<String> for UnitLabel {
    fn from(token: String) -> Self {
        normalize_unit(&token)
    }
}

impl From<UnitLabel> for String {
    fn from(label: UnitLabel) -> Self {
        label.to_string()
    }
}

impl fmt::Display for UnitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitLabel::Flow(unit) => f.write_str(unit.code()),
            UnitLabel::Unrecognized(token) => f.write_str(token),
        }
    }
}

/// Normalize an upstream unit token.
///
/// Accepts `cfs`, `ft³/s`, `cms` and `m³/s` in any case. Anything else is
/// upper-cased and passed through with a warning.
pub fn normalize_unit(token: &str) -> UnitLabel {
    match FlowUnit::parse(token) {
        Some(unit) => UnitLabel::Flow(unit),
        None => {
            tracing::warn!("Unrecognized flow unit '{}', passing through", token);
            UnitLabel::Unrecognized(token.trim().to_uppercase())
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Convert a flow value between units.
///
/// CFS→CMS multiplies by the exact reciprocal of the CMS→CFS factor so a
/// round trip returns the original value within floating tolerance.
pub fn convert(value: f64, from: FlowUnit, to: FlowUnit) -> f64 {
    match (from, to) {
        (FlowUnit::Cms, FlowUnit::Cfs) => value * CFS_PER_CMS,
        (FlowUnit::Cfs, FlowUnit::Cms) => value * (1.0 / CFS_PER_CMS),
        _ => value,
    }
}

// ---------------------------------------------------------------------------
// Preference
// ---------------------------------------------------------------------------

/// Shared handle to the user's preferred display unit.
///
/// Clones share state: a `set` through any clone is observed by every other
/// clone on its next `get`.
#[derive(Debug, Clone, Default)]
pub struct UnitPreference {
    inner: Arc<RwLock<FlowUnit>>,
}

impl UnitPreference {
    pub fn new(unit: FlowUnit) -> Self {
        Self {
            inner: Arc::new(RwLock::new(unit)),
        }
    }

    pub fn get(&self) -> FlowUnit {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, unit: FlowUnit) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = unit;
        tracing::info!("Preferred flow unit set to {}", unit);
    }

    /// Set from a user-supplied token. Unrecognized tokens reset to CFS.
    pub fn set_token(&self, token: &str) -> FlowUnit {
        let unit = FlowUnit::parse(token).unwrap_or_else(|| {
            tracing::warn!("Invalid flow unit '{}', resetting to CFS", token);
            FlowUnit::Cfs
        });
        self.set(unit);
        unit
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
