//! Shared helpers for the integration tests: deterministic data,
//! logical-to-blocked layout packing, and naive reference
//! implementations of convolution and pooling.

#![allow(dead_code)]

/// Deterministic values in `[-1, 1)` from a 64-bit LCG.
pub fn generate_values(count: usize, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((state >> 33) as f32) / (u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

/// Logical NCHW tensor `[batch][channels][height * width]` flattened.
#[derive(Clone)]
pub struct Logical {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub values: Vec<f32>,
}

impl Logical {
    pub fn random(batch: usize, channels: usize, height: usize, width: usize, seed: u64) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
            values: generate_values(batch * channels * height * width, seed),
        }
    }

    pub fn zeros(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
            values: vec![0.0; batch * channels * height * width],
        }
    }

    pub fn at(&self, n: usize, c: usize, h: usize, w: usize) -> f32 {
        self.values[((n * self.channels + c) * self.height + h) * self.width + w]
    }

    pub fn set(&mut self, n: usize, c: usize, h: usize, w: usize, value: f32) {
        self.values[((n * self.channels + c) * self.height + h) * self.width + w] = value;
    }
}

fn channel_blocks(channels: usize, block: usize) -> usize {
    (channels + block - 1) / block
}

/// Pack a logical NCHW tensor into NCHWc, zero-filling partial blocks.
pub fn pack_nchwc(tensor: &Logical, block: usize) -> Vec<f32> {
    let blocks = channel_blocks(tensor.channels, block);
    let spatial = tensor.height * tensor.width;
    let mut packed = vec![0.0f32; tensor.batch * blocks * spatial * block];
    for n in 0..tensor.batch {
        for c in 0..tensor.channels {
            for h in 0..tensor.height {
                for w in 0..tensor.width {
                    let index = (((n * blocks + c / block) * tensor.height + h) * tensor.width
                        + w)
                        * block
                        + c % block;
                    packed[index] = tensor.at(n, c, h, w);
                }
            }
        }
    }
    packed
}

/// Unpack an NCHWc tensor back into logical NCHW form, dropping the
/// zero-fill lanes of a partial block.
pub fn unpack_nchwc(
    packed: &[f32],
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
    block: usize,
) -> Logical {
    let blocks = channel_blocks(channels, block);
    let mut tensor = Logical::zeros(batch, channels, height, width);
    for n in 0..batch {
        for c in 0..channels {
            for h in 0..height {
                for w in 0..width {
                    let index =
                        (((n * blocks + c / block) * height + h) * width + w) * block + c % block;
                    tensor.set(n, c, h, w, packed[index]);
                }
            }
        }
    }
    tensor
}

/// Grouped OIHW filter: `[output_channels][input_channels_per_group][kh][kw]`.
#[derive(Clone)]
pub struct Filter {
    pub output_channels: usize,
    pub input_channels_per_group: usize,
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub values: Vec<f32>,
}

impl Filter {
    pub fn random(
        output_channels: usize,
        input_channels_per_group: usize,
        kernel_height: usize,
        kernel_width: usize,
        seed: u64,
    ) -> Self {
        Self {
            output_channels,
            input_channels_per_group,
            kernel_height,
            kernel_width,
            values: generate_values(
                output_channels * input_channels_per_group * kernel_height * kernel_width,
                seed,
            ),
        }
    }

    /// 1x1 identity filter: passes each channel through unchanged.
    pub fn identity(channels: usize) -> Self {
        let mut filter = Self {
            output_channels: channels,
            input_channels_per_group: channels,
            kernel_height: 1,
            kernel_width: 1,
            values: vec![0.0; channels * channels],
        };
        for c in 0..channels {
            filter.values[c * channels + c] = 1.0;
        }
        filter
    }

    pub fn at(&self, oc: usize, ic: usize, kh: usize, kw: usize) -> f32 {
        self.values[((oc * self.input_channels_per_group + ic) * self.kernel_height + kh)
            * self.kernel_width
            + kw]
    }
}

/// Pack an OIHW filter for the direct NCHWc engine:
/// `[group][oc_block][ic_block][kh][kw][ic_lane][oc_lane]`.
pub fn pack_filter_nchwc(filter: &Filter, groups: usize, block: usize) -> Vec<f32> {
    let out_per_group = filter.output_channels / groups;
    let out_blocks = out_per_group / block;
    let in_blocks = filter.input_channels_per_group / block;
    let (kh_count, kw_count) = (filter.kernel_height, filter.kernel_width);
    let mut packed =
        vec![0.0f32; filter.output_channels * filter.input_channels_per_group * kh_count * kw_count];
    let mut index = 0;
    for g in 0..groups {
        for ob in 0..out_blocks {
            for ibk in 0..in_blocks {
                for kh in 0..kh_count {
                    for kw in 0..kw_count {
                        for iv in 0..block {
                            for ov in 0..block {
                                packed[index] = filter.at(
                                    g * out_per_group + ob * block + ov,
                                    ibk * block + iv,
                                    kh,
                                    kw,
                                );
                                index += 1;
                            }
                        }
                    }
                }
            }
        }
    }
    packed
}

/// Pack an OIHW filter for the NCHW-input engine:
/// `[group][oc_block][ic][kh][kw][oc_lane]`.
pub fn pack_filter_nchw(filter: &Filter, groups: usize, block: usize) -> Vec<f32> {
    let out_per_group = filter.output_channels / groups;
    let out_blocks = out_per_group / block;
    let in_per_group = filter.input_channels_per_group;
    let (kh_count, kw_count) = (filter.kernel_height, filter.kernel_width);
    let mut packed = vec![0.0f32; filter.output_channels * in_per_group * kh_count * kw_count];
    let mut index = 0;
    for g in 0..groups {
        for ob in 0..out_blocks {
            for ic in 0..in_per_group {
                for kh in 0..kh_count {
                    for kw in 0..kw_count {
                        for ov in 0..block {
                            packed[index] =
                                filter.at(g * out_per_group + ob * block + ov, ic, kh, kw);
                            index += 1;
                        }
                    }
                }
            }
        }
    }
    packed
}

/// Pack a 1x1 OIHW filter for the pointwise engine:
/// `[group][oc_block][ic_block][ic_lane][oc_lane]`.
pub fn pack_filter_pointwise(filter: &Filter, groups: usize, block: usize) -> Vec<f32> {
    assert_eq!(filter.kernel_height, 1);
    assert_eq!(filter.kernel_width, 1);
    pack_filter_nchwc(filter, groups, block)
}

/// Pack a depthwise OIHW filter (one input channel per output channel):
/// `[group_block][kh][kw][lane]`, zero-filling the partial block.
pub fn pack_filter_depthwise(filter: &Filter, block: usize) -> Vec<f32> {
    assert_eq!(filter.input_channels_per_group, 1);
    let group_blocks = channel_blocks(filter.output_channels, block);
    let (kh_count, kw_count) = (filter.kernel_height, filter.kernel_width);
    let mut packed = vec![0.0f32; group_blocks * kh_count * kw_count * block];
    for c in 0..filter.output_channels {
        for kh in 0..kh_count {
            for kw in 0..kw_count {
                let index =
                    ((c / block * kh_count + kh) * kw_count + kw) * block + c % block;
                packed[index] = filter.at(c, 0, kh, kw);
            }
        }
    }
    packed
}

/// Pad a bias vector up to the block-padded channel extent.
pub fn pad_bias(bias: &[f32], block: usize) -> Vec<f32> {
    let blocks = channel_blocks(bias.len(), block);
    let mut padded = vec![0.0f32; blocks * block];
    padded[..bias.len()].copy_from_slice(bias);
    padded
}

/// Convolution geometry shared by the reference implementations.
#[derive(Clone, Copy)]
pub struct ConvGeometry {
    pub kernel: (usize, usize),
    pub dilation: (usize, usize),
    /// (top, left, bottom, right)
    pub padding: (usize, usize, usize, usize),
    pub stride: (usize, usize),
    pub groups: usize,
}

impl ConvGeometry {
    pub fn output_extent(&self, input: (usize, usize)) -> (usize, usize) {
        let span_h = self.dilation.0 * (self.kernel.0 - 1) + 1;
        let span_w = self.dilation.1 * (self.kernel.1 - 1) + 1;
        (
            (input.0 + self.padding.0 + self.padding.2 - span_h) / self.stride.0 + 1,
            (input.1 + self.padding.1 + self.padding.3 - span_w) / self.stride.1 + 1,
        )
    }
}

/// Naive grouped convolution in f64, with optional bias, accumulation
/// base, and elementwise post-transform.
pub fn reference_conv(
    input: &Logical,
    filter: &Filter,
    bias: Option<&[f32]>,
    geometry: ConvGeometry,
    accumulate_into: Option<&Logical>,
    transform: impl Fn(f64) -> f64,
) -> Logical {
    let (output_height, output_width) =
        geometry.output_extent((input.height, input.width));
    let out_per_group = filter.output_channels / geometry.groups;
    let in_per_group = input.channels / geometry.groups;
    assert_eq!(in_per_group, filter.input_channels_per_group);

    let mut output = Logical::zeros(
        input.batch,
        filter.output_channels,
        output_height,
        output_width,
    );

    for n in 0..input.batch {
        for oc in 0..filter.output_channels {
            let group = oc / out_per_group;
            for oh in 0..output_height {
                for ow in 0..output_width {
                    let mut sum = match accumulate_into {
                        Some(base) => base.at(n, oc, oh, ow) as f64,
                        None => 0.0,
                    };
                    for ic in 0..in_per_group {
                        for kh in 0..geometry.kernel.0 {
                            let ih = (oh * geometry.stride.0 + kh * geometry.dilation.0) as isize
                                - geometry.padding.0 as isize;
                            if ih < 0 || ih >= input.height as isize {
                                continue;
                            }
                            for kw in 0..geometry.kernel.1 {
                                let iw = (ow * geometry.stride.1 + kw * geometry.dilation.1)
                                    as isize
                                    - geometry.padding.1 as isize;
                                if iw < 0 || iw >= input.width as isize {
                                    continue;
                                }
                                sum += input.at(n, group * in_per_group + ic, ih as usize, iw as usize)
                                    as f64
                                    * filter.at(oc, ic, kh, kw) as f64;
                            }
                        }
                    }
                    if let Some(bias) = bias {
                        sum += bias[oc] as f64;
                    }
                    output.set(n, oc, oh, ow, transform(sum) as f32);
                }
            }
        }
    }
    output
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ReferencePoolKind {
    Maximum,
    AverageExcludePad,
    AverageIncludePad,
}

/// Naive pooling in f64.
pub fn reference_pool(
    input: &Logical,
    kind: ReferencePoolKind,
    geometry: ConvGeometry,
) -> Logical {
    let (output_height, output_width) =
        geometry.output_extent((input.height, input.width));
    let mut output = Logical::zeros(input.batch, input.channels, output_height, output_width);

    for n in 0..input.batch {
        for c in 0..input.channels {
            for oh in 0..output_height {
                for ow in 0..output_width {
                    let mut maximum = f64::from(f32::MIN);
                    let mut sum = 0.0f64;
                    let mut valid = 0usize;
                    for kh in 0..geometry.kernel.0 {
                        let ih = (oh * geometry.stride.0 + kh * geometry.dilation.0) as isize
                            - geometry.padding.0 as isize;
                        if ih < 0 || ih >= input.height as isize {
                            continue;
                        }
                        for kw in 0..geometry.kernel.1 {
                            let iw = (ow * geometry.stride.1 + kw * geometry.dilation.1) as isize
                                - geometry.padding.1 as isize;
                            if iw < 0 || iw >= input.width as isize {
                                continue;
                            }
                            let value = input.at(n, c, ih as usize, iw as usize) as f64;
                            maximum = maximum.max(value);
                            sum += value;
                            valid += 1;
                        }
                    }
                    let value = match kind {
                        ReferencePoolKind::Maximum => maximum,
                        ReferencePoolKind::AverageExcludePad => sum / valid as f64,
                        ReferencePoolKind::AverageIncludePad => {
                            sum / (geometry.kernel.0 * geometry.kernel.1) as f64
                        }
                    };
                    output.set(n, c, oh, ow, value as f32);
                }
            }
        }
    }
    output
}

/// Elementwise comparison with a mixed absolute/relative tolerance.
pub fn assert_close(actual: &Logical, expected: &Logical, tolerance: f32) {
    assert_eq!(actual.batch, expected.batch);
    assert_eq!(actual.channels, expected.channels);
    assert_eq!(actual.height, expected.height);
    assert_eq!(actual.width, expected.width);
    for n in 0..actual.batch {
        for c in 0..actual.channels {
            for h in 0..actual.height {
                for w in 0..actual.width {
                    let a = actual.at(n, c, h, w);
                    let e = expected.at(n, c, h, w);
                    let bound = tolerance * e.abs().max(1.0);
                    assert!(
                        (a - e).abs() <= bound,
                        "mismatch at [{n}][{c}][{h}][{w}]: {a} vs {e}"
                    );
                }
            }
        }
    }
}
