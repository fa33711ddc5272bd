//! nchwc-kernels: single-precision convolution and pooling over the
//! NCHWc blocked tensor layout.
//!
//! The crate is the execution core only: it derives the per-axis output
//! geometry from a caller-supplied shape description, selects among four
//! convolution strategies (direct NCHWc, NCHW input, pointwise,
//! depthwise) and three pooling kinds, and streams SIMD micro-kernel
//! calls across a fork-join worker pool with deterministic work
//! partitioning. Callers own every buffer and must pre-format the filter
//! tensor for the strategy the shape parameters select.

pub mod activation;
pub mod conv;
pub mod error;
pub mod kernels;
pub mod platform;
pub mod pool;
pub mod threading;
pub mod work_block;

pub use activation::Activation;
pub use conv::{conv, ConvAlgorithm};
pub use error::KernelError;
pub use kernels::{KernelFlags, PoolingKind};
pub use platform::{block_size, platform, IsaLevel, Platform};
pub use pool::pool;
pub use threading::{max_thread_count, ThreadPool};
pub use work_block::{partition_work, prepare_work_block, WorkBlock};
