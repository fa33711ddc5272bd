//! Post-convolution activations.
//!
//! Identity and ReLU are fused into the micro-kernels through the flag
//! byte; every other kind runs as a post-pass over the strip the kernel
//! just wrote (raw sums, `OTHER_ACTIVATION` flag). The strip covers
//! `filter_count` blocked output planes separated by the blocked output
//! size.

use crate::error::KernelError;

/// Elementwise transform applied to convolution output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Identity,
    Relu,
    LeakyRelu { alpha: f32 },
    Tanh,
    Logistic,
    Clip { minimum: f32, maximum: f32 },
    HardSigmoid { alpha: f32, beta: f32 },
}

impl Activation {
    #[inline]
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    #[inline]
    pub fn is_relu(&self) -> bool {
        matches!(self, Self::Relu)
    }

    /// Reject descriptors with no kernel path before any work is
    /// submitted.
    pub(crate) fn validate(&self) -> Result<(), KernelError> {
        match *self {
            Self::Identity | Self::Relu | Self::Tanh | Self::Logistic => Ok(()),
            Self::LeakyRelu { alpha } => {
                if alpha.is_finite() {
                    Ok(())
                } else {
                    Err(KernelError::UnsupportedActivation(format!(
                        "leaky relu alpha must be finite, got {alpha}"
                    )))
                }
            }
            Self::Clip { minimum, maximum } => {
                if minimum.is_nan() || maximum.is_nan() {
                    Err(KernelError::UnsupportedActivation(
                        "clip bounds must not be NaN".to_string(),
                    ))
                } else if minimum > maximum {
                    Err(KernelError::UnsupportedActivation(format!(
                        "clip minimum {minimum} exceeds maximum {maximum}"
                    )))
                } else {
                    Ok(())
                }
            }
            Self::HardSigmoid { alpha, beta } => {
                if alpha.is_finite() && beta.is_finite() {
                    Ok(())
                } else {
                    Err(KernelError::UnsupportedActivation(format!(
                        "hard sigmoid parameters must be finite, got alpha={alpha} beta={beta}"
                    )))
                }
            }
        }
    }

    #[inline]
    fn apply_scalar(&self, x: f32) -> f32 {
        match *self {
            Self::Identity => x,
            Self::Relu => x.max(0.0),
            Self::LeakyRelu { alpha } => {
                if x >= 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            Self::Tanh => x.tanh(),
            Self::Logistic => 1.0 / (1.0 + (-x).exp()),
            Self::Clip { minimum, maximum } => x.clamp(minimum, maximum),
            Self::HardSigmoid { alpha, beta } => (alpha * x + beta).clamp(0.0, 1.0),
        }
    }
}

/// In-place activation over a just-written output strip: `rows` blocked
/// planes of `width` elements, `row_stride` elements apart.
pub(crate) unsafe fn apply_strip(
    activation: &Activation,
    output: *mut f32,
    rows: usize,
    width: usize,
    row_stride: usize,
) {
    for row in 0..rows {
        let base = output.wrapping_add(row * row_stride);
        for offset in 0..width {
            let slot = base.wrapping_add(offset);
            *slot = activation.apply_scalar(*slot);
        }
    }
}
