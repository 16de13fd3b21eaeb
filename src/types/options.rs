//! Generation options
//!
//! Runtime knobs a client may send with each chat request. Values are checked
//! once, when a [`GenerationOptions`] is built, so nothing downstream has to
//! re-validate them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_NUM_CTX: u32 = 4096;
pub const DEFAULT_NUM_PREDICT: u32 = 64;
pub const DEFAULT_KEEP_ALIVE: &str = "5m";

/// Errors raised while building generation options
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptionsError {
    #[error("temperature must be within [0.0, 2.0], got {0}")]
    TemperatureOutOfRange(f32),

    #[error("num_ctx must be a positive integer, got {0}")]
    InvalidContextSize(i64),

    #[error("num_predict must be a positive integer, got {0}")]
    InvalidPredictCount(i64),
}

/// Options as they arrive on the wire, before validation
///
/// Integer fields are signed so that negative values surface as an
/// [`OptionsError`] instead of a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsPayload {
    pub temperature: f32,
    pub num_ctx: i64,
    pub num_predict: i64,
    pub keep_alive: String,
    pub stop: Vec<String>,
}

impl Default for OptionsPayload {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            num_ctx: DEFAULT_NUM_CTX as i64,
            num_predict: DEFAULT_NUM_PREDICT as i64,
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
            stop: Vec::new(),
        }
    }
}

/// Validated, immutable generation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    temperature: f32,
    num_ctx: u32,
    num_predict: u32,
    stop: Vec<String>,
    keep_alive: String,
}

impl GenerationOptions {
    /// Sampling temperature (0.0 = greedy)
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Context window size in tokens
    pub fn num_ctx(&self) -> u32 {
        self.num_ctx
    }

    /// Maximum number of tokens to generate
    pub fn num_predict(&self) -> u32 {
        self.num_predict
    }

    /// Stop sequences, in the order the client gave them
    pub fn stop(&self) -> &[String] {
        &self.stop
    }

    pub fn keep_alive(&self) -> &str {
        &self.keep_alive
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            num_ctx: DEFAULT_NUM_CTX,
            num_predict: DEFAULT_NUM_PREDICT,
            stop: Vec::new(),
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
        }
    }
}

impl TryFrom<OptionsPayload> for GenerationOptions {
    type Error = OptionsError;

    fn try_from(payload: OptionsPayload) -> Result<Self, Self::Error> {
        // NaN fails the range check as well
        if !(0.0..=2.0).contains(&payload.temperature) {
            return Err(OptionsError::TemperatureOutOfRange(payload.temperature));
        }

        let num_ctx = positive_u32(payload.num_ctx)
            .ok_or(OptionsError::InvalidContextSize(payload.num_ctx))?;
        let num_predict = positive_u32(payload.num_predict)
            .ok_or(OptionsError::InvalidPredictCount(payload.num_predict))?;

        Ok(Self {
            temperature: payload.temperature,
            num_ctx,
            num_predict,
            stop: payload.stop,
            keep_alive: payload.keep_alive,
        })
    }
}

impl From<&GenerationOptions> for OptionsPayload {
    fn from(options: &GenerationOptions) -> Self {
        Self {
            temperature: options.temperature,
            num_ctx: options.num_ctx as i64,
            num_predict: options.num_predict as i64,
            keep_alive: options.keep_alive.clone(),
            stop: options.stop.clone(),
        }
    }
}

fn positive_u32(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_payload_defaults() {
        let options = GenerationOptions::try_from(OptionsPayload::default()).unwrap();
        assert_eq!(options, GenerationOptions::default());
        assert!((options.temperature() - 0.8).abs() < f32::EPSILON);
        assert_eq!(options.num_ctx(), 4096);
        assert_eq!(options.num_predict(), 64);
        assert!(options.stop().is_empty());
    }

    #[test]
    fn test_override_on_top_of_validated_options() {
        let base = GenerationOptions::try_from(OptionsPayload {
            temperature: 0.2,
            stop: vec!["\n".to_string()],
            ..Default::default()
        })
        .unwrap();

        let options = GenerationOptions::try_from(OptionsPayload {
            num_predict: 100,
            ..OptionsPayload::from(&base)
        })
        .unwrap();
        assert_eq!(options.num_predict(), 100);
        assert!((options.temperature() - 0.2).abs() < f32::EPSILON);
        assert_eq!(options.stop(), ["\n".to_string()]);

        let bad = GenerationOptions::try_from(OptionsPayload {
            num_predict: 0,
            ..OptionsPayload::from(&base)
        });
        assert_eq!(bad, Err(OptionsError::InvalidPredictCount(0)));
    }

    #[test]
    fn test_partial_payload_fills_defaults() {
        let payload: OptionsPayload =
            serde_json::from_str(r#"{"temperature": 0.1, "stop": ["\n\n", "```"]}"#).unwrap();
        let options = GenerationOptions::try_from(payload).unwrap();
        assert!((options.temperature() - 0.1).abs() < f32::EPSILON);
        assert_eq!(options.num_ctx(), 4096);
        assert_eq!(options.stop(), ["\n\n".to_string(), "```".to_string()]);
    }

    #[test]
    fn test_temperature_bounds() {
        for ok in [0.0, 1.0, 2.0] {
            let payload = OptionsPayload {
                temperature: ok,
                ..Default::default()
            };
            assert!(GenerationOptions::try_from(payload).is_ok(), "{ok} should pass");
        }

        for bad in [-0.1, 2.01, f32::NAN] {
            let payload = OptionsPayload {
                temperature: bad,
                ..Default::default()
            };
            assert!(matches!(
                GenerationOptions::try_from(payload),
                Err(OptionsError::TemperatureOutOfRange(_))
            ));
        }
    }

    #[test]
    fn test_non_positive_sizes_rejected() {
        let payload = OptionsPayload {
            num_ctx: 0,
            ..Default::default()
        };
        assert_eq!(
            GenerationOptions::try_from(payload),
            Err(OptionsError::InvalidContextSize(0))
        );

        let payload = OptionsPayload {
            num_predict: -5,
            ..Default::default()
        };
        assert_eq!(
            GenerationOptions::try_from(payload),
            Err(OptionsError::InvalidPredictCount(-5))
        );

        let payload = OptionsPayload {
            num_ctx: i64::from(u32::MAX) + 1,
            ..Default::default()
        };
        assert!(GenerationOptions::try_from(payload).is_err());
    }
}
