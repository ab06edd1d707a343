//! # Value Converters
//!
//! Stateless policy objects translating between the register-decoded raw
//! value and the semantic value held in the process value store.
//!
//! Each converter is a pure function pair: [`apply`](ValueConverter::apply)
//! on the read path (raw towards store) and [`invert`](ValueConverter::invert)
//! on the write path (store towards raw). Converters hold no state and are
//! safe to share across tasks.

use serde::{Deserialize, Serialize};

use crate::error::{PollError, PollResult};
use crate::value::SemanticValue;

/// Translation policy between raw register values and store values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueConverter {
    /// Pass the value through unchanged.
    #[default]
    Identity,
    /// Multiply by 10^exponent on read, divide on write.
    ScalePowerOfTen { exponent: i8 },
    /// Multiply by a fixed factor on read, divide on write.
    ScaleFactor { factor: f64 },
    /// Flip a boolean. Fails on non-boolean input.
    InvertBool,
    /// Saturate a numeric value into [min, max]. Total: clamps instead of
    /// failing, in both directions.
    ClampRange { min: f64, max: f64 },
}

impl ValueConverter {
    /// Read path: map a register-decoded raw value to its store value.
    pub fn apply(&self, raw: &SemanticValue) -> PollResult<SemanticValue> {
        match self {
            ValueConverter::Identity => Ok(raw.clone()),
            ValueConverter::ScalePowerOfTen { exponent } => {
                let v = numeric(raw, "scale_power_of_ten")?;
                Ok(SemanticValue::Float(v * 10f64.powi(*exponent as i32)))
            }
            ValueConverter::ScaleFactor { factor } => {
                let v = numeric(raw, "scale_factor")?;
                Ok(SemanticValue::Float(v * factor))
            }
            ValueConverter::InvertBool => match raw {
                SemanticValue::Bool(b) => Ok(SemanticValue::Bool(!b)),
                other => Err(PollError::encoding(format!(
                    "invert_bool applied to non-boolean {:?}",
                    other
                ))),
            },
            ValueConverter::ClampRange { min, max } => {
                let v = numeric(raw, "clamp_range")?;
                Ok(SemanticValue::Float(v.clamp(*min, *max)))
            }
        }
    }

    /// Write path: map a store value back to the raw value the element
    /// encodes.
    pub fn invert(&self, value: &SemanticValue) -> PollResult<SemanticValue> {
        match self {
            ValueConverter::Identity => Ok(value.clone()),
            ValueConverter::ScalePowerOfTen { exponent } => {
                let v = numeric(value, "scale_power_of_ten")?;
                Ok(SemanticValue::Float(v / 10f64.powi(*exponent as i32)))
            }
            ValueConverter::ScaleFactor { factor } => {
                if *factor == 0.0 {
                    return Err(PollError::encoding("scale_factor of zero is not invertible"));
                }
                let v = numeric(value, "scale_factor")?;
                Ok(SemanticValue::Float(v / factor))
            }
            ValueConverter::InvertBool => match value {
                SemanticValue::Bool(b) => Ok(SemanticValue::Bool(!b)),
                other => Err(PollError::encoding(format!(
                    "invert_bool applied to non-boolean {:?}",
                    other
                ))),
            },
            ValueConverter::ClampRange { min, max } => {
                let v = numeric(value, "clamp_range")?;
                Ok(SemanticValue::Float(v.clamp(*min, *max)))
            }
        }
    }
}

fn numeric(value: &SemanticValue, converter: &str) -> PollResult<f64> {
    value.as_f64().ok_or_else(|| {
        PollError::encoding(format!("{} applied to non-numeric {:?}", converter, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let v = SemanticValue::Signed(-42);
        assert_eq!(ValueConverter::Identity.apply(&v).unwrap(), v);
        assert_eq!(ValueConverter::Identity.invert(&v).unwrap(), v);
    }

    #[test]
    fn test_power_of_ten_round_trip() {
        let conv = ValueConverter::ScalePowerOfTen { exponent: -2 };
        let applied = conv.apply(&SemanticValue::Unsigned(1550)).unwrap();
        assert_eq!(applied, SemanticValue::Float(15.5));
        let inverted = conv.invert(&applied).unwrap();
        assert_eq!(inverted, SemanticValue::Float(1550.0));
    }

    #[test]
    fn test_scale_factor() {
        let conv = ValueConverter::ScaleFactor { factor: 0.25 };
        assert_eq!(
            conv.apply(&SemanticValue::Unsigned(8)).unwrap(),
            SemanticValue::Float(2.0)
        );
        assert_eq!(
            conv.invert(&SemanticValue::Float(2.0)).unwrap(),
            SemanticValue::Float(8.0)
        );

        let degenerate = ValueConverter::ScaleFactor { factor: 0.0 };
        assert!(degenerate.invert(&SemanticValue::Float(1.0)).is_err());
    }

    #[test]
    fn test_invert_bool() {
        let conv = ValueConverter::InvertBool;
        assert_eq!(
            conv.apply(&SemanticValue::Bool(true)).unwrap(),
            SemanticValue::Bool(false)
        );
        assert!(conv.apply(&SemanticValue::Unsigned(1)).is_err());
    }

    #[test]
    fn test_clamp_saturates() {
        let conv = ValueConverter::ClampRange { min: 0.0, max: 100.0 };
        assert_eq!(
            conv.apply(&SemanticValue::Signed(-5)).unwrap(),
            SemanticValue::Float(0.0)
        );
        assert_eq!(
            conv.invert(&SemanticValue::Float(250.0)).unwrap(),
            SemanticValue::Float(100.0)
        );
        assert_eq!(
            conv.apply(&SemanticValue::Float(55.5)).unwrap(),
            SemanticValue::Float(55.5)
        );
    }
}
