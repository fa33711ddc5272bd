//! Micro-kernel contracts for the NCHWc engines.
//!
//! Every micro-kernel is a pure function over raw pointers and byte
//! strides. The engines derive the strides once per worker chunk and the
//! kernels walk the buffers directly, so the same contract can be served
//! by the scalar reference implementations or by the AVX2/AVX-512
//! specializations selected through the platform table.
//!
//! Pointer discipline: base pointers handed to a kernel may point *before*
//! the start of an input row when the output column region overlaps the
//! left padding. Those pointers are formed with wrapping offsets and are
//! only dereferenced after the in-row bounds check, so no out-of-bounds
//! access is ever performed.

pub mod scalar;

#[cfg(target_arch = "x86_64")]
pub mod avx2;
#[cfg(target_arch = "x86_64")]
pub mod avx512;

use std::fmt;

/// Size of one tensor element in bytes. All kernel strides are expressed
/// in bytes of `f32`.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// Maximum number of blocked filters processed by one kernel invocation.
pub const FILTER_SET_SIZE: usize = 4;

/// Pointwise convolution processes at most this many input channels per
/// kernel call. Smaller batches flush intermediate results too often,
/// larger batches thrash the cache.
pub const MAX_POINTWISE_CHANNEL_BATCH: usize = 128;

// ── Kernel flags ───────────────────────────────────────────────────────

/// Bit-encoded per-call kernel options.
///
/// The bit assignments cross the micro-kernel ABI and are fixed:
/// bit 0 accumulates into the existing output instead of overwriting,
/// bit 1 adds the bias vector, bit 2 fuses a ReLU clamp, bit 3 tells the
/// kernel to leave raw sums for a caller-side activation post-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelFlags(u8);

impl KernelFlags {
    pub const NONE: KernelFlags = KernelFlags(0);
    pub const ACCUMULATE_OUTPUT: KernelFlags = KernelFlags(1);
    pub const BIAS_ADDITION: KernelFlags = KernelFlags(2);
    pub const RELU_ACTIVATION: KernelFlags = KernelFlags(4);
    pub const OTHER_ACTIVATION: KernelFlags = KernelFlags(8);

    #[inline(always)]
    pub const fn contains(self, other: KernelFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub const fn insert(self, other: KernelFlags) -> KernelFlags {
        KernelFlags(self.0 | other.0)
    }

    /// The raw byte transmitted at the call site.
    #[inline(always)]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for KernelFlags {
    type Output = KernelFlags;

    fn bitor(self, rhs: KernelFlags) -> KernelFlags {
        self.insert(rhs)
    }
}

impl std::ops::BitOrAssign for KernelFlags {
    fn bitor_assign(&mut self, rhs: KernelFlags) {
        *self = self.insert(rhs);
    }
}

// ── Pooling kinds ──────────────────────────────────────────────────────

/// Pooling variant, also the index into the platform pooling kernel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingKind {
    Maximum = 0,
    AverageExcludePad = 1,
    AverageIncludePad = 2,
}

impl fmt::Display for PoolingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Maximum => "max",
            Self::AverageExcludePad => "average (exclude pad)",
            Self::AverageIncludePad => "average (include pad)",
        };
        write!(f, "{name}")
    }
}

// ── Kernel parameter blocks ────────────────────────────────────────────

/// Arguments for the spatial convolution kernels (NCHWc and NCHW input).
///
/// `input` addresses the first kernel tap of output column zero and may
/// precede `input_base` when left padding is in effect. `input_base` is
/// the unpadded start of the first effective input row; successive rows
/// are `dilated_input_width` bytes apart and each spans `input_width`
/// bytes. Taps outside `[row_base, row_base + input_width)` are skipped
/// by the kernel for columns inside the pad regions.
pub struct ConvKernelParams {
    pub input: *const f32,
    pub filter: *const f32,
    pub output: *mut f32,
    /// Bytes between two horizontally adjacent output taps.
    pub stride_width: usize,
    /// Bytes between two kernel taps along the width axis.
    pub dilation_width: usize,
    /// Number of blocked filters to produce, `1..=FILTER_SET_SIZE`.
    pub filter_count: usize,
    /// Bytes from the last tap of one input row to the first of the next.
    pub input_stride: usize,
    /// Bytes between two blocked filters.
    pub filter_stride: usize,
    /// Bytes between two blocked output planes.
    pub output_stride: usize,
    /// Effective kernel height after excluding rows that fall in padding.
    pub kernel_height: usize,
    /// Full kernel width.
    pub kernel_width: usize,
    /// Unpadded start of the first effective input row.
    pub input_base: *const f32,
    /// Bytes spanned by one input row.
    pub input_width: usize,
    /// Bytes between two vertically adjacent kernel taps.
    pub dilated_input_width: usize,
    pub output_count_left_pad: usize,
    pub output_count: usize,
    pub output_count_right_pad: usize,
    /// Null unless `flags` carries `BIAS_ADDITION`.
    pub bias: *const f32,
    pub flags: KernelFlags,
}

/// Arguments for the pointwise convolution kernel. No spatial loop: the
/// kernel reduces over `input_channel_blocks` channel blocks for each of
/// `output_count` output positions.
pub struct PointwiseKernelParams {
    pub input: *const f32,
    pub filter: *const f32,
    pub output: *mut f32,
    /// Bytes between two horizontally adjacent output taps.
    pub stride_width: usize,
    /// Input channel blocks reduced by this call.
    pub input_channel_blocks: usize,
    pub filter_count: usize,
    /// Bytes between two input channel blocks.
    pub input_stride: usize,
    /// Bytes between two blocked filters.
    pub filter_stride: usize,
    /// Bytes between two blocked output planes.
    pub output_stride: usize,
    /// Output positions produced by this call (may cover several rows).
    pub output_count: usize,
    pub bias: *const f32,
    pub flags: KernelFlags,
}

/// Arguments for the depthwise convolution kernel. One filter block, a
/// lane-wise product instead of a cross-lane reduction.
pub struct DepthwiseKernelParams {
    pub input: *const f32,
    pub filter: *const f32,
    pub output: *mut f32,
    pub stride_width: usize,
    pub dilation_width: usize,
    pub input_stride: usize,
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub input_base: *const f32,
    pub input_width: usize,
    pub dilated_input_width: usize,
    pub output_count_left_pad: usize,
    pub output_count: usize,
    pub output_count_right_pad: usize,
    pub bias: *const f32,
    pub flags: KernelFlags,
}

/// Arguments for the pooling kernels.
pub struct PoolKernelParams {
    pub input: *const f32,
    pub output: *mut f32,
    pub stride_width: usize,
    pub dilation_width: usize,
    pub input_stride: usize,
    /// Full kernel size `KH * KW`; the include-pad average divides by this
    /// even when the effective kernel height is reduced.
    pub kernel_size: usize,
    /// Effective kernel height after excluding rows that fall in padding.
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub input_base: *const f32,
    pub input_width: usize,
    pub dilated_input_width: usize,
    pub output_count_left_pad: usize,
    pub output_count: usize,
    pub output_count_right_pad: usize,
}

/// Spatial convolution micro-kernel (NCHWc or NCHW input).
pub type ConvKernelFn = unsafe fn(&ConvKernelParams);
/// Pointwise convolution micro-kernel.
pub type PointwiseKernelFn = unsafe fn(&PointwiseKernelParams);
/// Depthwise convolution micro-kernel.
pub type DepthwiseKernelFn = unsafe fn(&DepthwiseKernelParams);
/// Pooling micro-kernel.
pub type PoolKernelFn = unsafe fn(&PoolKernelParams);

// ── Pointer helpers ────────────────────────────────────────────────────

/// Offset a const pointer by a byte count without an in-bounds
/// requirement. Used for tap addresses that may land in the padding
/// region; such addresses are compared against the row bounds before any
/// dereference.
#[inline(always)]
pub(crate) fn byte_offset(ptr: *const f32, bytes: usize) -> *const f32 {
    ptr.cast::<u8>().wrapping_add(bytes).cast::<f32>()
}

/// Offset a mut pointer by a byte count.
#[inline(always)]
pub(crate) fn byte_offset_mut(ptr: *mut f32, bytes: usize) -> *mut f32 {
    ptr.cast::<u8>().wrapping_add(bytes).cast::<f32>()
}

/// Whether `tap` lies inside the row starting at `row_base` and spanning
/// `row_bytes` bytes. Plain address comparison; valid for the wrapped
/// pointers formed by the engines because padding offsets are tiny
/// relative to the address space.
#[inline(always)]
pub(crate) fn tap_in_row(tap: *const f32, row_base: *const f32, row_bytes: usize) -> bool {
    let tap = tap as usize;
    let base = row_base as usize;
    tap >= base && tap < base + row_bytes
}
