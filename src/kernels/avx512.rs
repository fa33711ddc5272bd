//! AVX-512 micro-kernels (block width 16).
//!
//! Same structure as the AVX2 kernels with a `__m512` register per
//! channel block. Selected when AVX-512F is available; the wider block
//! also doubles the channel blocking reported by the platform probe.

use std::arch::x86_64::*;

use super::{
    byte_offset, byte_offset_mut, tap_in_row, ConvKernelParams, DepthwiseKernelParams,
    KernelFlags, PointwiseKernelParams, PoolKernelParams, FILTER_SET_SIZE,
};

const BLOCK: usize = 16;

#[inline(always)]
unsafe fn load_accumulators(
    output: *const f32,
    output_stride: usize,
    bias: *const f32,
    filter_count: usize,
    flags: KernelFlags,
    acc: &mut [__m512; FILTER_SET_SIZE],
) {
    let accumulate = flags.contains(KernelFlags::ACCUMULATE_OUTPUT);
    let bias_addition = flags.contains(KernelFlags::BIAS_ADDITION);
    for f in 0..filter_count {
        let mut value = if accumulate {
            _mm512_loadu_ps(byte_offset(output, f * output_stride))
        } else {
            _mm512_setzero_ps()
        };
        if bias_addition {
            value = _mm512_add_ps(value, _mm512_loadu_ps(bias.wrapping_add(f * BLOCK)));
        }
        acc[f] = value;
    }
}

#[inline(always)]
unsafe fn store_accumulators(
    output: *mut f32,
    output_stride: usize,
    filter_count: usize,
    flags: KernelFlags,
    acc: &[__m512; FILTER_SET_SIZE],
) {
    let relu = flags.contains(KernelFlags::RELU_ACTIVATION);
    for f in 0..filter_count {
        let mut value = acc[f];
        if relu {
            value = _mm512_max_ps(value, _mm512_setzero_ps());
        }
        _mm512_storeu_ps(byte_offset_mut(output, f * output_stride), value);
    }
}

#[target_feature(enable = "avx512f")]
pub unsafe fn conv_nchwc(p: &ConvKernelParams) {
    let full_start = p.output_count_left_pad;
    let full_end = full_start + p.output_count;
    let total_output = full_end + p.output_count_right_pad;
    let mut acc = [_mm512_setzero_ps(); FILTER_SET_SIZE];

    for index in 0..total_output {
        let checked = index < full_start || index >= full_end;
        let column_output = p.output.wrapping_add(index * BLOCK);

        load_accumulators(
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
                        let x = _mm512_set1_ps(*tap.wrapping_add(iv));
                        for f in 0..p.filter_count {
                            let weights = byte_offset(filter_row, f * p.filter_stride)
                                .wrapping_add(kw * BLOCK * BLOCK + iv * BLOCK);
                            acc[f] = _mm512_fmadd_ps(x, _mm512_loadu_ps(weights), acc[f]);
                        }
                    }
                }
                tap = byte_offset(tap, p.dilation_width);
            }
            tap = byte_offset(tap, p.input_stride);
            row_base = byte_offset(row_base, p.dilated_input_width);
            filter_row = filter_row.wrapping_add(BLOCK * BLOCK * p.kernel_width);
        }

        store_accumulators(
            column_output,
            p.output_stride,
            p.filter_count,
            p.flags,
            &acc,
        );
    }
}

#[target_feature(enable = "avx512f")]
pub unsafe fn conv_nchw(p: &ConvKernelParams) {
    let full_start = p.output_count_left_pad;
    let full_end = full_start + p.output_count;
    let total_output = full_end + p.output_count_right_pad;
    let mut acc = [_mm512_setzero_ps(); FILTER_SET_SIZE];

    for index in 0..total_output {
        let checked = index < full_start || index >= full_end;
        let column_output = p.output.wrapping_add(index * BLOCK);

        load_accumulators(
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
                    let x = _mm512_set1_ps(*tap);
                    for f in 0..p.filter_count {
                        let weights =
                            byte_offset(filter_row, f * p.filter_stride).wrapping_add(kw * BLOCK);
                        acc[f] = _mm512_fmadd_ps(x, _mm512_loadu_ps(weights), acc[f]);
                    }
                }
                tap = byte_offset(tap, p.dilation_width);
            }
            tap = byte_offset(tap, p.input_stride);
            row_base = byte_offset(row_base, p.dilated_input_width);
            filter_row = filter_row.wrapping_add(BLOCK * p.kernel_width);
        }

        store_accumulators(
            column_output,
            p.output_stride,
            p.filter_count,
            p.flags,
            &acc,
        );
    }
}

#[target_feature(enable = "avx512f")]
pub unsafe fn conv_pointwise(p: &PointwiseKernelParams) {
    let mut acc = [_mm512_setzero_ps(); FILTER_SET_SIZE];

    for index in 0..p.output_count {
        let column_output = p.output.wrapping_add(index * BLOCK);

        load_accumulators(
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
                let x = _mm512_set1_ps(*tap.wrapping_add(iv));
                for f in 0..p.filter_count {
                    let weights = byte_offset(p.filter, f * p.filter_stride)
                        .wrapping_add(icb * BLOCK * BLOCK + iv * BLOCK);
                    acc[f] = _mm512_fmadd_ps(x, _mm512_loadu_ps(weights), acc[f]);
                }
            }
        }

        store_accumulators(
            column_output,
            p.output_stride,
            p.filter_count,
            p.flags,
            &acc,
        );
    }
}

#[target_feature(enable = "avx512f")]
pub unsafe fn conv_depthwise(p: &DepthwiseKernelParams) {
    let full_start = p.output_count_left_pad;
    let full_end = full_start + p.output_count;
    let total_output = full_end + p.output_count_right_pad;

    let accumulate = p.flags.contains(KernelFlags::ACCUMULATE_OUTPUT);
    let bias_addition = p.flags.contains(KernelFlags::BIAS_ADDITION);
    let relu = p.flags.contains(KernelFlags::RELU_ACTIVATION);

    for index in 0..total_output {
        let checked = index < full_start || index >= full_end;
        let column_output = p.output.wrapping_add(index * BLOCK);

        let mut acc = if accumulate {
            _mm512_loadu_ps(column_output)
        } else {
            _mm512_setzero_ps()
        };
        if bias_addition {
            acc = _mm512_add_ps(acc, _mm512_loadu_ps(p.bias));
        }

        let mut tap = byte_offset(p.input, index * p.stride_width);
        let mut row_base = p.input_base;
        let mut filter_row = p.filter;

        for _kh in 0..p.kernel_height {
            for kw in 0..p.kernel_width {
                if !checked || tap_in_row(tap, row_base, p.input_width) {
                    let x = _mm512_loadu_ps(tap);
                    let w = _mm512_loadu_ps(filter_row.wrapping_add(kw * BLOCK));
                    acc = _mm512_fmadd_ps(x, w, acc);
                }
                tap = byte_offset(tap, p.dilation_width);
            }
            tap = byte_offset(tap, p.input_stride);
            row_base = byte_offset(row_base, p.dilated_input_width);
            filter_row = filter_row.wrapping_add(BLOCK * p.kernel_width);
        }

        if relu {
            acc = _mm512_max_ps(acc, _mm512_setzero_ps());
        }
        _mm512_storeu_ps(column_output, acc);
    }
}

const POOL_MAXIMUM: usize = 0;
const POOL_AVERAGE_EXCLUDE_PAD: usize = 1;
const POOL_AVERAGE_INCLUDE_PAD: usize = 2;

#[inline(always)]
unsafe fn pool_body<const KIND: usize>(p: &PoolKernelParams) {
    let full_start = p.output_count_left_pad;
    let full_end = full_start + p.output_count;
    let total_output = full_end + p.output_count_right_pad;

    for index in 0..total_output {
        let checked = index < full_start || index >= full_end;
        let column_output = p.output.wrapping_add(index * BLOCK);

        let mut acc = if KIND == POOL_MAXIMUM {
            _mm512_set1_ps(f32::MIN)
        } else {
            _mm512_setzero_ps()
        };
        let mut valid_taps = 0usize;

        let mut tap = byte_offset(p.input, index * p.stride_width);
        let mut row_base = p.input_base;

        for _kh in 0..p.kernel_height {
            for _kw in 0..p.kernel_width {
                if !checked || tap_in_row(tap, row_base, p.input_width) {
                    valid_taps += 1;
                    let x = _mm512_loadu_ps(tap);
                    if KIND == POOL_MAXIMUM {
                        acc = _mm512_max_ps(acc, x);
                    } else {
                        acc = _mm512_add_ps(acc, x);
                    }
                }
                tap = byte_offset(tap, p.dilation_width);
            }
            tap = byte_offset(tap, p.input_stride);
            row_base = byte_offset(row_base, p.dilated_input_width);
        }

        let value = match KIND {
            POOL_AVERAGE_EXCLUDE_PAD => _mm512_div_ps(acc, _mm512_set1_ps(valid_taps as f32)),
            POOL_AVERAGE_INCLUDE_PAD => _mm512_div_ps(acc, _mm512_set1_ps(p.kernel_size as f32)),
            _ => acc,
        };
        _mm512_storeu_ps(column_output, value);
    }
}

#[target_feature(enable = "avx512f")]
pub unsafe fn pool_maximum(p: &PoolKernelParams) {
    pool_body::<POOL_MAXIMUM>(p);
}

#[target_feature(enable = "avx512f")]
pub unsafe fn pool_average_exclude_pad(p: &PoolKernelParams) {
    pool_body::<POOL_AVERAGE_EXCLUDE_PAD>(p);
}

#[target_feature(enable = "avx512f")]
pub unsafe fn pool_average_include_pad(p: &PoolKernelParams) {
    pool_body::<POOL_AVERAGE_INCLUDE_PAD>(p);
}
