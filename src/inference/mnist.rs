use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Linear, VarBuilder};
use tracing::info;

use crate::inference::classifier::{
    argmax, Classifier, Digit, InferenceError, LoadError, DIGIT_CLASSES,
};
use crate::inference::preprocess::{PixelVector, IMAGE_SIDE, PIXEL_COUNT};

/// Network shapes a model file may contain, told apart by their tensor names.
///
/// These are the layouts written by candle's MNIST training example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `linear`: 784 -> 10
    Linear,
    /// `ln1`, `ln2`: 784 -> hidden -> 10
    Mlp { hidden: usize },
    /// `c1`, `c2`, `fc1`, `fc2`: two 5x5 convolutions followed by two linear layers
    Conv,
}

impl Layout {
    fn detect(tensors: &HashMap<String, Tensor>) -> Option<Self> {
        if tensors.contains_key("c1.weight") {
            Some(Layout::Conv)
        } else if let Some(ln1) = tensors.get("ln1.weight") {
            ln1.dim(0).ok().map(|hidden| Layout::Mlp { hidden })
        } else if tensors.contains_key("linear.weight") {
            Some(Layout::Linear)
        } else {
            None
        }
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layout::Linear => write!(f, "linear"),
            Layout::Mlp { hidden } => write!(f, "mlp({hidden})"),
            Layout::Conv => write!(f, "convnet"),
        }
    }
}

// Taken from https://github.com/huggingface/candle/blob/main/candle-examples/examples/mnist-training/main.rs
enum Net {
    Linear(Linear),
    Mlp {
        ln1: Linear,
        ln2: Linear,
    },
    Conv {
        conv1: Conv2d,
        conv2: Conv2d,
        fc1: Linear,
        fc2: Linear,
    },
}

impl Net {
    fn new(layout: Layout, vb: VarBuilder) -> candle_core::Result<Self> {
        let net = match layout {
            Layout::Linear => Net::Linear(candle_nn::linear(
                PIXEL_COUNT,
                DIGIT_CLASSES,
                vb.pp("linear"),
            )?),
            Layout::Mlp { hidden } => Net::Mlp {
                ln1: candle_nn::linear(PIXEL_COUNT, hidden, vb.pp("ln1"))?,
                ln2: candle_nn::linear(hidden, DIGIT_CLASSES, vb.pp("ln2"))?,
            },
            Layout::Conv => Net::Conv {
                conv1: candle_nn::conv2d(1, 32, 5, Default::default(), vb.pp("c1"))?,
                conv2: candle_nn::conv2d(32, 64, 5, Default::default(), vb.pp("c2"))?,
                fc1: candle_nn::linear(1024, 1024, vb.pp("fc1"))?,
                fc2: candle_nn::linear(1024, DIGIT_CLASSES, vb.pp("fc2"))?,
            },
        };
        Ok(net)
    }
}

impl Module for Net {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Net::Linear(linear) => linear.forward(xs),
            Net::Mlp { ln1, ln2 } => xs.apply(ln1)?.relu()?.apply(ln2),
            Net::Conv {
                conv1,
                conv2,
                fc1,
                fc2,
            } => {
                let (batch, _) = xs.dims2()?;
                let side = IMAGE_SIDE as usize;
                xs.reshape((batch, 1, side, side))?
                    .apply(conv1)?
                    .max_pool2d(2)?
                    .apply(conv2)?
                    .max_pool2d(2)?
                    .flatten_from(1)?
                    .apply(fc1)?
                    .relu()?
                    .apply(fc2)
            }
        }
    }
}

/// A digit classifier loaded from a safetensors file
pub struct MnistModel {
    net: Net,
    layout: Layout,
    device: Device,
}

impl MnistModel {
    #[tracing::instrument(level = "info", skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let device = Device::Cpu;
        let tensors =
            candle_core::safetensors::load(path, &device).map_err(|source| LoadError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let Some(layout) = Layout::detect(&tensors) else {
            let mut names: Vec<&str> = tensors.keys().map(String::as_str).collect();
            names.sort_unstable();
            return Err(LoadError::UnknownLayout {
                path: path.to_path_buf(),
                names: names.join(", "),
            });
        };

        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let net = Net::new(layout, vb).map_err(|source| LoadError::Build {
            path: path.to_path_buf(),
            source,
        })?;

        info!(%layout, "Loaded model");
        Ok(Self {
            net,
            layout,
            device,
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl Classifier for MnistModel {
    #[tracing::instrument(level = "debug", skip_all)]
    fn predict(&self, pixels: &PixelVector) -> Result<Digit, InferenceError> {
        let input = Tensor::from_slice(pixels.as_slice(), (1, PIXEL_COUNT), &self.device)?;
        let activations = self.net.forward(&input)?.flatten_all()?.to_vec1::<f32>()?;
        argmax(&activations)
    }
}
