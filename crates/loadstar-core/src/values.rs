//! Typed value access
//!
//! Turns raw response frames into numbers, text and calibrated samples.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::protocol::{Frame, ProtocolError};
use crate::units::{self, Unit, KG_PER_POUND, STANDARD_GRAVITY};

/// Averaging window range in samples
pub const AVERAGING_WINDOW_MIN: u32 = 1;
/// Averaging window range in samples
pub const AVERAGING_WINDOW_MAX: u32 = 1024;
/// Averaging threshold range in percent of capacity
pub const AVERAGING_THRESHOLD_MIN: u32 = 1;
/// Averaging threshold range in percent of capacity
pub const AVERAGING_THRESHOLD_MAX: u32 = 100;

/// Parse a frame as a decimal float
pub fn parse_float(frame: &Frame) -> Result<f64, ProtocolError> {
    let text = frame.text();
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ProtocolError::NotNumeric(text.into_owned()))
}

/// Parse a frame as an integer
pub fn parse_integer(frame: &Frame) -> Result<i64, ProtocolError> {
    let text = frame.text();
    text.parse::<i64>()
        .map_err(|_| ProtocolError::NotNumeric(text.into_owned()))
}

/// Decode a frame as text, verbatim after trimming
pub fn parse_text(frame: &Frame) -> String {
    frame.text().into_owned()
}

/// Parse an averaging threshold report such as `00000\t( 2.1999995e-01)`.
///
/// The value is the number inside the parentheses; a bare number is also
/// accepted.
pub fn parse_threshold_response(frame: &Frame) -> Result<f64, ProtocolError> {
    let text = frame.text();
    let inner = match (text.find('('), text.rfind(')')) {
        (Some(open), Some(close)) if open < close => &text[open + 1..close],
        _ => &*text,
    };
    inner
        .trim()
        .parse::<f64>()
        .map_err(|_| ProtocolError::NotNumeric(text.to_string()))
}

/// Clamp an averaging window to the protocol range
pub fn clamp_averaging_window(samples: u32) -> u32 {
    samples.clamp(AVERAGING_WINDOW_MIN, AVERAGING_WINDOW_MAX)
}

/// Clamp an averaging threshold to the protocol range
pub fn clamp_averaging_threshold(percent: u32) -> u32 {
    percent.clamp(AVERAGING_THRESHOLD_MIN, AVERAGING_THRESHOLD_MAX)
}

/// Named output scaling for simple-scale mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFactor {
    /// Native values unchanged
    One,
    /// Pound readings reported in kilograms
    PoundsToKilograms,
    /// Pound readings reported in grams
    PoundsToGrams,
    /// Pound readings reported in newtons
    PoundsToNewtons,
    /// Arbitrary multiplier
    Custom(f64),
}

impl ScaleFactor {
    /// Named presets
    pub const PRESETS: [ScaleFactor; 4] = [
        ScaleFactor::One,
        ScaleFactor::PoundsToKilograms,
        ScaleFactor::PoundsToGrams,
        ScaleFactor::PoundsToNewtons,
    ];

    /// Multiplier applied to every raw value
    pub fn factor(&self) -> f64 {
        match self {
            ScaleFactor::One => 1.0,
            ScaleFactor::PoundsToKilograms => KG_PER_POUND,
            ScaleFactor::PoundsToGrams => KG_PER_POUND * 1000.0,
            ScaleFactor::PoundsToNewtons => KG_PER_POUND * STANDARD_GRAVITY,
            ScaleFactor::Custom(f) => *f,
        }
    }

    /// Unit the scaled values end up in, when the preset implies one
    pub fn unit(&self) -> Option<Unit> {
        match self {
            ScaleFactor::PoundsToKilograms => Some(Unit::Kilogram),
            ScaleFactor::PoundsToGrams => Some(Unit::Gram),
            ScaleFactor::PoundsToNewtons => Some(Unit::Newton),
            ScaleFactor::One | ScaleFactor::Custom(_) => None,
        }
    }

    /// Preset name
    pub fn name(&self) -> &'static str {
        match self {
            ScaleFactor::One => "one",
            ScaleFactor::PoundsToKilograms => "pounds_to_kilograms",
            ScaleFactor::PoundsToGrams => "pounds_to_grams",
            ScaleFactor::PoundsToNewtons => "pounds_to_newtons",
            ScaleFactor::Custom(_) => "custom",
        }
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        ScaleFactor::One
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleFactor::Custom(v) => write!(f, "{v}"),
            preset => f.write_str(preset.name()),
        }
    }
}

impl FromStr for ScaleFactor {
    type Err = ProtocolError;

    /// Accepts a preset name (any case, `-` or `_`) or a plain number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase().replace('-', "_");
        if let Some(preset) = Self::PRESETS.iter().find(|p| p.name() == name) {
            return Ok(*preset);
        }
        name.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(ScaleFactor::Custom)
            .ok_or_else(|| ProtocolError::Config(format!("unknown scale factor '{s}'")))
    }
}

/// How raw values become output values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Calibration {
    /// Multiply by a factor (no unit system)
    Scale(ScaleFactor),
    /// Convert between two units of the table
    Units {
        /// Unit the device reports in
        native: Unit,
        /// Unit handed to the caller
        output: Unit,
    },
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration::Scale(ScaleFactor::One)
    }
}

impl Calibration {
    /// Validate and build a unit-system calibration
    pub fn units(native: Unit, output: Unit) -> Result<Self, ProtocolError> {
        if !units::convertible(native, output) {
            return Err(ProtocolError::IncompatibleUnits {
                from: native.to_string(),
                to: output.to_string(),
            });
        }
        Ok(Calibration::Units { native, output })
    }

    /// Apply to one raw value
    pub fn apply(&self, raw: f64) -> Sample {
        match *self {
            Calibration::Scale(factor) => Sample {
                value: raw * factor.factor(),
                unit: factor.unit(),
            },
            Calibration::Units { native, output } => {
                // Pair was validated when the calibration was built
                let value = units::convert(raw, native, output).unwrap_or(raw);
                Sample {
                    value,
                    unit: Some(output),
                }
            }
        }
    }
}

/// A parsed measurement tagged with its unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Measured value
    pub value: f64,
    /// Unit of `value`, if known
    pub unit: Option<Unit>,
}

impl Sample {
    /// A sample as captured, before calibration
    pub fn raw(value: f64, native: Option<Unit>) -> Self {
        Self {
            value,
            unit: native,
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Some(unit) => write!(f, "{} {}", self.value, unit),
            None => write!(f, "{}", self.value),
        }
    }
}

/// Shared calibration applied to every numeric reading.
///
/// Clones share state: a change made through one handle applies to every
/// conversion made afterwards through any clone, including the streaming
/// task. Values already returned are never touched.
#[derive(Debug, Clone, Default)]
pub struct ValueCodec {
    calibration: Arc<RwLock<Calibration>>,
}

impl ValueCodec {
    /// Codec with the given calibration
    pub fn new(calibration: Calibration) -> Self {
        Self {
            calibration: Arc::new(RwLock::new(calibration)),
        }
    }

    /// Current calibration
    pub fn calibration(&self) -> Calibration {
        *self
            .calibration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the calibration
    pub fn set_calibration(&self, calibration: Calibration) {
        *self
            .calibration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = calibration;
    }

    /// Switch to simple-scale mode
    pub fn set_scale_factor(&self, factor: ScaleFactor) {
        tracing::debug!(%factor, "scale factor set");
        self.set_calibration(Calibration::Scale(factor));
    }

    /// Switch to unit-system mode. Fails before anything is converted if
    /// either token is unknown or the pair has no conversion.
    pub fn set_output_unit(&self, native: &str, output: &str) -> Result<(), ProtocolError> {
        let incompatible = || ProtocolError::IncompatibleUnits {
            from: native.trim().to_string(),
            to: output.trim().to_string(),
        };
        let native_unit = Unit::from_token(native).ok_or_else(incompatible)?;
        let output_unit = Unit::from_token(output).ok_or_else(incompatible)?;
        let calibration = Calibration::units(native_unit, output_unit)?;
        tracing::debug!(native = %native_unit, output = %output_unit, "output unit set");
        self.set_calibration(calibration);
        Ok(())
    }

    /// Calibrate one raw value
    pub fn convert(&self, raw: f64) -> Sample {
        self.calibration().apply(raw)
    }

    /// Parse and calibrate one frame
    pub fn decode(&self, frame: &Frame) -> Result<Sample, ProtocolError> {
        parse_float(frame).map(|raw| self.convert(raw))
    }
}
