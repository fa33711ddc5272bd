//! Errors surfaced by the convolution and pooling entry points.

use std::fmt;

/// Errors reported at the `conv`/`pool` boundary.
///
/// Internal helpers never clamp bad geometry into something runnable; any
/// inconsistency in the caller-supplied shapes is reported here before a
/// single worker is submitted.
#[derive(Debug, Clone)]
pub enum KernelError {
    /// Shape arrays are inconsistent: a derived output count would be
    /// negative, padding covers an entire kernel span, channel counts
    /// violate the blocking requirements, or a buffer is too small for
    /// the described tensor.
    InvalidShape(String),
    /// The activation descriptor has no kernel path (invalid or
    /// non-finite parameters).
    UnsupportedActivation(String),
    /// Forwarded from the thread-pool primitive.
    ThreadPool(String),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidShape(msg) => write!(f, "invalid shape: {msg}"),
            Self::UnsupportedActivation(msg) => write!(f, "unsupported activation: {msg}"),
            Self::ThreadPool(msg) => write!(f, "thread pool failure: {msg}"),
        }
    }
}

impl std::error::Error for KernelError {}
