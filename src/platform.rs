//! Runtime platform probe and micro-kernel selection.
//!
//! The probe runs once per process: it inspects the CPU feature set,
//! picks the channel block width (16 with AVX-512F, otherwise 8), and
//! resolves the micro-kernel function pointers for every family. The
//! result is cached in a `OnceLock`, so the probe is thread-safe and
//! idempotent.

use std::sync::OnceLock;

use crate::kernels::{
    scalar, ConvKernelFn, DepthwiseKernelFn, PointwiseKernelFn, PoolKernelFn, PoolingKind,
};

/// Instruction-set tier selected for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsaLevel {
    Avx512,
    Avx2,
    Scalar,
}

impl IsaLevel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Avx512 => "AVX-512",
            Self::Avx2 => "AVX2",
            Self::Scalar => "scalar",
        }
    }
}

/// Resolved kernel table for the running CPU.
pub struct Platform {
    pub isa: IsaLevel,
    /// NCHWc channel block width, 8 or 16.
    pub block_size: usize,
    pub conv_nchwc: ConvKernelFn,
    pub conv_nchw: ConvKernelFn,
    pub conv_pointwise: PointwiseKernelFn,
    pub conv_depthwise: DepthwiseKernelFn,
    pool: [PoolKernelFn; 3],
}

impl Platform {
    pub fn pool_kernel(&self, kind: PoolingKind) -> PoolKernelFn {
        self.pool[kind as usize]
    }
}

static PLATFORM: OnceLock<Platform> = OnceLock::new();

/// The process-wide kernel table, probed lazily on first use.
pub fn platform() -> &'static Platform {
    PLATFORM.get_or_init(|| {
        let detected = detect();
        log::debug!(
            "NCHWc kernel platform: {} (block size {})",
            detected.isa.name(),
            detected.block_size
        );
        detected
    })
}

/// The NCHWc channel block width for this platform, 8 or 16.
pub fn block_size() -> usize {
    platform().block_size
}

fn detect() -> Platform {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f") {
            return avx512_platform();
        }
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return avx2_platform();
        }
    }
    scalar_platform()
}

#[cfg(target_arch = "x86_64")]
fn avx512_platform() -> Platform {
    use crate::kernels::avx512;
    Platform {
        isa: IsaLevel::Avx512,
        block_size: 16,
        conv_nchwc: avx512::conv_nchwc,
        conv_nchw: avx512::conv_nchw,
        conv_pointwise: avx512::conv_pointwise,
        conv_depthwise: avx512::conv_depthwise,
        pool: [
            avx512::pool_maximum,
            avx512::pool_average_exclude_pad,
            avx512::pool_average_include_pad,
        ],
    }
}

#[cfg(target_arch = "x86_64")]
fn avx2_platform() -> Platform {
    use crate::kernels::avx2;
    Platform {
        isa: IsaLevel::Avx2,
        block_size: 8,
        conv_nchwc: avx2::conv_nchwc,
        conv_nchw: avx2::conv_nchw,
        conv_pointwise: avx2::conv_pointwise,
        conv_depthwise: avx2::conv_depthwise,
        pool: [
            avx2::pool_maximum,
            avx2::pool_average_exclude_pad,
            avx2::pool_average_include_pad,
        ],
    }
}

fn scalar_platform() -> Platform {
    Platform {
        isa: IsaLevel::Scalar,
        block_size: 8,
        conv_nchwc: scalar::conv_nchwc::<8>,
        conv_nchw: scalar::conv_nchw::<8>,
        conv_pointwise: scalar::conv_pointwise::<8>,
        conv_depthwise: scalar::conv_depthwise::<8>,
        pool: [
            scalar::pool_maximum::<8>,
            scalar::pool_average_exclude_pad::<8>,
            scalar::pool_average_include_pad::<8>,
        ],
    }
}
