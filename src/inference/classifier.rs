use std::fmt::Display;
use std::path::PathBuf;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::inference::preprocess::PixelVector;

/// Number of classes a digit classifier distinguishes
pub const DIGIT_CLASSES: usize = 10;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read model {path}: {source}")]
    Read {
        path: PathBuf,
        source: candle_core::Error,
    },
    #[error("model {path} does not match any known layout, found tensors: {names}")]
    UnknownLayout { path: PathBuf, names: String },
    #[error("failed to build model from {path}: {source}")]
    Build {
        path: PathBuf,
        source: candle_core::Error,
    },
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("forward pass failed: {0}")]
    Runtime(#[from] candle_core::Error),
    #[error("model produced {0} activations, expected 10")]
    OutputShape(usize),
}

/// A single predicted digit, always in `0..=9`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digit(u8);

impl Digit {
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<usize> for Digit {
    type Error = usize;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        if index < DIGIT_CLASSES {
            Ok(Digit(index as u8))
        } else {
            Err(index)
        }
    }
}

impl Display for Digit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The wire format carries the digit as a one character string
impl Serialize for Digit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Anything able to turn a preprocessed image into a digit.
///
/// Implementations are shared between concurrent requests, so `predict` only
/// takes `&self`.
pub trait Classifier: Send + Sync {
    fn predict(&self, pixels: &PixelVector) -> Result<Digit, InferenceError>;
}

/// Index of the largest activation, the lowest index wins ties
pub fn argmax(activations: &[f32]) -> Result<Digit, InferenceError> {
    if activations.len() != DIGIT_CLASSES {
        return Err(InferenceError::OutputShape(activations.len()));
    }
    let (index, _) = activations
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &value)| {
            if value > best_value {
                (i, value)
            } else {
                (best, best_value)
            }
        });
    Digit::try_from(index).map_err(|_| InferenceError::OutputShape(activations.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_largest_activation() {
        let mut activations = [0.0; DIGIT_CLASSES];
        activations[7] = 3.5;
        assert_eq!(argmax(&activations).unwrap().value(), 7);
    }

    #[test]
    fn argmax_ties_go_to_lowest_index() {
        let activations = [0.1, 0.9, 0.2, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.9];
        assert_eq!(argmax(&activations).unwrap().value(), 1);
        assert_eq!(argmax(&[0.0; DIGIT_CLASSES]).unwrap().value(), 0);
    }

    #[test]
    fn argmax_handles_negative_logits() {
        let activations = [-9.0, -8.0, -7.0, -0.5, -6.0, -5.0, -4.0, -3.0, -2.0, -1.0];
        assert_eq!(argmax(&activations).unwrap().value(), 3);
    }

    #[test]
    fn argmax_rejects_wrong_width() {
        assert!(matches!(
            argmax(&[1.0; 3]),
            Err(InferenceError::OutputShape(3))
        ));
    }

    #[test]
    fn digit_serializes_as_string() {
        let digit = Digit::try_from(4).unwrap();
        assert_eq!(serde_json::to_string(&digit).unwrap(), r#""4""#);
        assert_eq!(Digit::try_from(10), Err(10));
    }
}
