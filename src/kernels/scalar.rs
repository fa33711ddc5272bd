//! Scalar reference micro-kernels.
//!
//! These are the canonical semantics for every kernel family; the AVX2
//! and AVX-512 implementations must agree with them modulo floating-point
//! rounding differences (SIMD uses fused multiply-add). The block width is
//! a const generic so the platform table can instantiate the fallback at
//! the narrow block size while tests exercise other widths.
//!
//! Accumulator discipline shared by all convolution kernels: the
//! accumulator starts from the existing output when `ACCUMULATE_OUTPUT`
//! is set (zero otherwise), the bias joins at initialization when
//! `BIAS_ADDITION` is set, and the ReLU clamp is applied after the
//! reduction when `RELU_ACTIVATION` is set. This fixes the per-lane
//! summation order, which keeps results bit-stable for a fixed thread
//! count.

use super::{
    byte_offset, byte_offset_mut, tap_in_row, ConvKernelParams, DepthwiseKernelParams,
    KernelFlags, PointwiseKernelParams, PoolKernelParams, FILTER_SET_SIZE,
};

#[inline(always)]
unsafe fn load_accumulators<const BLOCK: usize>(
    output: *const f32,
    output_stride: usize,
    bias: *const f32,
    filter_count: usize,
    flags: KernelFlags,
    acc: &mut [[f32; BLOCK]; FILTER_SET_SIZE],
) {
    let accumulate = flags.contains(KernelFlags::ACCUMULATE_OUTPUT);
    let bias_addition = flags.contains(KernelFlags::BIAS_ADDITION);
    for f in 0..filter_count {
        let plane = byte_offset(output, f * output_stride);
        for ov in 0..BLOCK {
            let mut value = if accumulate { *plane.wrapping_add(ov) } else { 0.0 };
            if bias_addition {
                value += *bias.wrapping_add(f * BLOCK + ov);
            }
            acc[f][ov] = value;
        }
    }
}

#[inline(always)]
unsafe fn store_accumulators<const BLOCK: usize>(
    output: *mut f32,
    output_stride: usize,
    filter_count: usize,
    flags: KernelFlags,
    acc: &[[f32; BLOCK]; FILTER_SET_SIZE],
) {
    let relu = flags.contains(KernelFlags::RELU_ACTIVATION);
    for f in 0..filter_count {
        let plane = byte_offset_mut(output, f * output_stride);
        for ov in 0..BLOCK {
            let mut value = acc[f][ov];
            if relu {
                value = value.max(0.0);
            }
            *plane.wrapping_add(ov) = value;
        }
    }
}

/// Direct convolution over NCHWc input: each spatial tap carries `BLOCK`
/// input lanes and the filter holds a `BLOCK x BLOCK` lane matrix per tap.
pub unsafe fn conv_nchwc<const BLOCK: usize>(p: &ConvKernelParams) {
    debug_assert!(p.filter_count >= 1 && p.filter_count <= FILTER_SET_SIZE);

    let full_start = p.output_count_left_pad;
    let full_end = full_start + p.output_count;
    let total_output = full_end + p.output_count_right_pad;
    let mut acc = [[0.0f32; BLOCK]; FILTER_SET_SIZE];

    for index in 0..total_output {
        let checked = index < full_start || index >= full_end;
        let column_output = p.output.wrapping_add(index * BLOCK);

        load_accumulators::<BLOCK>(
            column_output,
            p.output_stride,
            p.bias,
            p.filter_count,
            p.flags,
            &mut acc,
        );

        let mut tap = byte_offset(p.input, index * p.stride_width);
        let mut row_base = p.input_base;
        let mut filter_row = p.filter;

        for _kh in 0..p.kernel_height {
            for kw in 0..p.kernel_width {
                if !checked || tap_in_row(tap, row_base, p.input_width) {
                    for iv in 0..BLOCK {
                        let x = *tap.wrapping_add(iv);
                        for f in 0..p.filter_count {
                            let weights = byte_offset(filter_row, f * p.filter_stride)
                                .wrapping_add(kw * BLOCK * BLOCK + iv * BLOCK);
                            for ov in 0..BLOCK {
                                acc[f][ov] += x * *weights.wrapping_add(ov);
                            }
                        }
                    }
                }
                tap = byte_offset(tap, p.dilation_width);
            }
            tap = byte_offset(tap, p.input_stride);
            row_base = byte_offset(row_base, p.dilated_input_width);
            filter_row = filter_row.wrapping_add(BLOCK * BLOCK * p.kernel_width);
        }

        store_accumulators::<BLOCK>(
            column_output,
            p.output_stride,
            p.filter_count,
            p.flags,
            &acc,
        );
    }
}

/// Convolution over NCHW input: one scalar input channel per call series,
/// the filter holds `BLOCK` output lanes per tap.
pub unsafe fn conv_nchw<const BLOCK: usize>(p: &ConvKernelParams) {
    debug_assert!(p.filter_count >= 1 && p.filter_count <= FILTER_SET_SIZE);

    let full_start = p.output_count_left_pad;
    let full_end = full_start + p.output_count;
    let total_output = full_end + p.output_count_right_pad;
    let mut acc = [[0.0f32; BLOCK]; FILTER_SET_SIZE];

    for index in 0..total_output {
        let checked = index < full_start || index >= full_end;
        let column_output = p.output.wrapping_add(index * BLOCK);

        load_accumulators::<BLOCK>(
            column_output,
            p.output_stride,
            p.bias,
            p.filter_count,
            p.flags,
            &mut acc,
        );

        let mut tap = byte_offset(p.input, index * p.stride_width);
        let mut row_base = p.input_base;
        let mut filter_row = p.filter;

        for _kh in 0..p.kernel_height {
            for kw in 0..p.kernel_width {
                if !checked || tap_in_row(tap, row_base, p.input_width) {
                    let x = *tap;
                    for f in 0..p.filter_count {
                        let weights = byte_offset(filter_row, f * p.filter_stride)
                            .wrapping_add(kw * BLOCK);
                        for ov in 0..BLOCK {
                            acc[f][ov] += x * *weights.wrapping_add(ov);
                        }
                    }
                }
                tap = byte_offset(tap, p.dilation_width);
            }
            tap = byte_offset(tap, p.input_stride);
            row_base = byte_offset(row_base, p.dilated_input_width);
            filter_row = filter_row.wrapping_add(BLOCK * p.kernel_width);
        }

        store_accumulators::<BLOCK>(
            column_output,
            p.output_stride,
            p.filter_count,
            p.flags,
            &acc,
        );
    }
}

/// Pointwise convolution: reduces over channel blocks with no spatial
/// loop. Output positions are contiguous, so the caller may hand several
/// logical rows to a single call when the stride is one.
pub unsafe fn conv_pointwise<const BLOCK: usize>(p: &PointwiseKernelParams) {
    debug_assert!(p.filter_count >= 1 && p.filter_count <= FILTER_SET_SIZE);

    let mut acc = [[0.0f32; BLOCK]; FILTER_SET_SIZE];

    for index in 0..p.output_count {
        let column_output = p.output.wrapping_add(index * BLOCK);

        load_accumulators::<BLOCK>(
            column_output,
            p.output_stride,
            p.bias,
            p.filter_count,
            p.flags,
            &mut acc,
        );

        for icb in 0..p.input_channel_blocks {
            let tap = byte_offset(p.input, icb * p.input_stride + index * p.stride_width);
            for iv in 0..BLOCK {
                let x = *tap.wrapping_add(iv);
                for f in 0..p.filter_count {
                    let weights = byte_offset(p.filter, f * p.filter_stride)
                        .wrapping_add(icb * BLOCK * BLOCK + iv * BLOCK);
                    for ov in 0..BLOCK {
                        acc[f][ov] += x * *weights.wrapping_add(ov);
                    }
                }
            }
        }

        store_accumulators::<BLOCK>(
            column_output,
            p.output_stride,
            p.filter_count,
            p.flags,
            &acc,
        );
    }
}

/// Depthwise convolution: lane-wise products, one filter block.
pub unsafe fn conv_depthwise<const BLOCK: usize>(p: &DepthwiseKernelParams) {
    let full_start = p.output_count_left_pad;
    let full_end = full_start + p.output_count;
    let total_output = full_end + p.output_count_right_pad;

    let accumulate = p.flags.contains(KernelFlags::ACCUMULATE_OUTPUT);
    let bias_addition = p.flags.contains(KernelFlags::BIAS_ADDITION);
    let relu = p.flags.contains(KernelFlags::RELU_ACTIVATION);

    let mut acc = [0.0f32; BLOCK];

    for index in 0..total_output {
        let checked = index < full_start || index >= full_end;
        let column_output = p.output.wrapping_add(index * BLOCK);

        for (ov, slot) in acc.iter_mut().enumerate() {
            let mut value = if accumulate {
                *column_output.wrapping_add(ov)
            } else {
                0.0
            };
            if bias_addition {
                value += *p.bias.wrapping_add(ov);
            }
            *slot = value;
        }

        let mut tap = byte_offset(p.input, index * p.stride_width);
        let mut row_base = p.input_base;
        let mut filter_row = p.filter;

        for _kh in 0..p.kernel_height {
            for kw in 0..p.kernel_width {
                if !checked || tap_in_row(tap, row_base, p.input_width) {
                    for (ov, slot) in acc.iter_mut().enumerate() {
                        *slot += *tap.wrapping_add(ov) * *filter_row.wrapping_add(kw * BLOCK + ov);
                    }
                }
                tap = byte_offset(tap, p.dilation_width);
            }
            tap = byte_offset(tap, p.input_stride);
            row_base = byte_offset(row_base, p.dilated_input_width);
            filter_row = filter_row.wrapping_add(BLOCK * p.kernel_width);
        }

        for (ov, slot) in acc.iter().enumerate() {
            let mut value = *slot;
            if relu {
                value = value.max(0.0);
            }
            *column_output.wrapping_add(ov) = value;
        }
    }
}

const POOL_MAXIMUM: usize = 0;
const POOL_AVERAGE_EXCLUDE_PAD: usize = 1;
const POOL_AVERAGE_INCLUDE_PAD: usize = 2;

#[inline(always)]
unsafe fn pool_body<const BLOCK: usize, const KIND: usize>(p: &PoolKernelParams) {
    let full_start = p.output_count_left_pad;
    let full_end = full_start + p.output_count;
    let total_output = full_end + p.output_count_right_pad;

    let mut acc = [0.0f32; BLOCK];

    for index in 0..total_output {
        let checked = index < full_start || index >= full_end;
        let column_output = p.output.wrapping_add(index * BLOCK);

        let initial = if KIND == POOL_MAXIMUM { f32::MIN } else { 0.0 };
        acc.fill(initial);
        let mut valid_taps = 0usize;

        let mut tap = byte_offset(p.input, index * p.stride_width);
        let mut row_base = p.input_base;

        for _kh in 0..p.kernel_height {
            for _kw in 0..p.kernel_width {
                if !checked || tap_in_row(tap, row_base, p.input_width) {
                    valid_taps += 1;
                    for (ov, slot) in acc.iter_mut().enumerate() {
                        let x = *tap.wrapping_add(ov);
                        if KIND == POOL_MAXIMUM {
                            *slot = slot.max(x);
                        } else {
                            *slot += x;
                        }
                    }
                }
                tap = byte_offset(tap, p.dilation_width);
            }
            tap = byte_offset(tap, p.input_stride);
            row_base = byte_offset(row_base, p.dilated_input_width);
        }

        for (ov, slot) in acc.iter().enumerate() {
            let value = match KIND {
                POOL_AVERAGE_EXCLUDE_PAD => *slot / valid_taps as f32,
                POOL_AVERAGE_INCLUDE_PAD => *slot / p.kernel_size as f32,
                _ => *slot,
            };
            *column_output.wrapping_add(ov) = value;
        }
    }
}

pub unsafe fn pool_maximum<const BLOCK: usize>(p: &PoolKernelParams) {
    pool_body::<BLOCK, POOL_MAXIMUM>(p);
}

pub unsafe fn pool_average_exclude_pad<const BLOCK: usize>(p: &PoolKernelParams) {
    pool_body::<BLOCK, POOL_AVERAGE_EXCLUDE_PAD>(p);
}

pub unsafe fn pool_average_include_pad<const BLOCK: usize>(p: &PoolKernelParams) {
    pool_body::<BLOCK, POOL_AVERAGE_INCLUDE_PAD>(p);
}
