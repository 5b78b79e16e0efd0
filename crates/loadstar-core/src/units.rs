//! Unit Conversion
//!
//! Units a load cell reports in, and conversion between them:
//! - Mass: pound, ounce, kilogram, gram
//! - Force: newton, kilonewton
//! - Raw ADC counts (only convertible to themselves)
//!
//! Mass converts to force through standard gravity, the usual load cell
//! convention where a pound of load reads as one pound-force.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Standard gravity in m/s²
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Kilograms per pound (exact by definition)
pub const KG_PER_POUND: f64 = 0.45359237;

/// Physical dimension of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    /// Base unit: kilogram
    Mass,
    /// Base unit: newton
    Force,
    /// Raw counts
    Count,
}

/// Recognized units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// lb (also read as lbf)
    Pound,
    /// oz
    Ounce,
    /// kg
    Kilogram,
    /// g
    Gram,
    /// N
    Newton,
    /// kN
    Kilonewton,
    /// ADC counts
    Count,
}

struct UnitEntry {
    unit: Unit,
    symbol: &'static str,
    aliases: &'static [&'static str],
    dimension: Dimension,
    to_base: f64,
}

const UNIT_TABLE: &[UnitEntry] = &[
    UnitEntry {
        unit: Unit::Pound,
        symbol: "lb",
        aliases: &["lb", "lbs", "lbf", "pound", "pounds"],
        dimension: Dimension::Mass,
        to_base: KG_PER_POUND,
    },
    UnitEntry {
        unit: Unit::Ounce,
        symbol: "oz",
        aliases: &["oz", "ozf", "ounce", "ounces"],
        dimension: Dimension::Mass,
        to_base: KG_PER_POUND / 16.0,
    },
    UnitEntry {
        unit: Unit::Kilogram,
        symbol: "kg",
        aliases: &["kg", "kgs", "kgf", "kilogram", "kilograms"],
        dimension: Dimension::Mass,
        to_base: 1.0,
    },
    UnitEntry {
        unit: Unit::Gram,
        symbol: "g",
        aliases: &["g", "gf", "gram", "grams"],
        dimension: Dimension::Mass,
        to_base: 0.001,
    },
    UnitEntry {
        unit: Unit::Newton,
        symbol: "N",
        aliases: &["n", "newton", "newtons"],
        dimension: Dimension::Force,
        to_base: 1.0,
    },
    UnitEntry {
        unit: Unit::Kilonewton,
        symbol: "kN",
        aliases: &["kn", "kilonewton", "kilonewtons"],
        dimension: Dimension::Force,
        to_base: 1000.0,
    },
    UnitEntry {
        unit: Unit::Count,
        symbol: "counts",
        aliases: &["count", "counts", "adc", "raw"],
        dimension: Dimension::Count,
        to_base: 1.0,
    },
];

impl Unit {
    fn entry(&self) -> &'static UnitEntry {
        // Every variant has exactly one table row
        UNIT_TABLE
            .iter()
            .find(|e| e.unit == *self)
            .unwrap_or(&UNIT_TABLE[0])
    }

    /// Short symbol
    pub fn symbol(&self) -> &'static str {
        self.entry().symbol
    }

    /// Physical dimension
    pub fn dimension(&self) -> Dimension {
        self.entry().dimension
    }

    /// Look up a device or user token such as `LB`, `kgs` or `Newtons`
    pub fn from_token(token: &str) -> Option<Unit> {
        let token = token.trim().to_lowercase();
        UNIT_TABLE
            .iter()
            .find(|e| e.aliases.contains(&token.as_str()))
            .map(|e| e.unit)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::from_token(s).ok_or_else(|| ProtocolError::IncompatibleUnits {
            from: s.trim().to_string(),
            to: "any known unit".to_string(),
        })
    }
}

/// Check if a conversion between two units is defined
pub fn convertible(from: Unit, to: Unit) -> bool {
    use Dimension::*;
    matches!(
        (from.dimension(), to.dimension()),
        (Mass | Force, Mass | Force) | (Count, Count)
    )
}

/// Convert `value` from one unit to another
pub fn convert(value: f64, from: Unit, to: Unit) -> Result<f64, ProtocolError> {
    if !convertible(from, to) {
        return Err(ProtocolError::IncompatibleUnits {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    let from_entry = from.entry();
    let to_entry = to.entry();

    let mut base = value * from_entry.to_base;
    match (from_entry.dimension, to_entry.dimension) {
        (Dimension::Mass, Dimension::Force) => base *= STANDARD_GRAVITY,
        (Dimension::Force, Dimension::Mass) => base /= STANDARD_GRAVITY,
        _ => {}
    }
    Ok(base / to_entry.to_base)
}

/// Convert pounds to kilograms
pub fn lbs_to_kg(lbs: f64) -> f64 {
    lbs * KG_PER_POUND
}

/// Convert kilograms to pounds
pub fn kg_to_lbs(kg: f64) -> f64 {
    kg / KG_PER_POUND
}

/// Convert pound-force to newtons
pub fn lbf_to_newtons(lbf: f64) -> f64 {
    lbf * KG_PER_POUND * STANDARD_GRAVITY
}

/// Convert newtons to pound-force
pub fn newtons_to_lbf(newtons: f64) -> f64 {
    newtons / (KG_PER_POUND * STANDARD_GRAVITY)
}
