//! Convolution engines over the NCHWc blocking format.
//!
//! The entry point builds a work block, selects one of four execution
//! strategies, and submits the strategy across the worker pool. Three of
//! the strategies (direct NCHWc, NCHW input, pointwise) share the grouped
//! traversal of batch x group x filter-set x output-row implemented by
//! [`GroupedConvIterator`]; the depthwise strategy walks a simpler
//! batch-channel-block x output-row space.
//!
//! Every worker builds its own engine state from the shared read-only
//! context, so no mutable structure crosses threads. Buffer cursors are
//! raw pointers advanced with wrapping arithmetic: a cursor may transiently
//! point into a padding region, and the micro-kernels bounds-check those
//! taps before dereferencing.

use crate::activation::{self, Activation};
use crate::error::KernelError;
use crate::kernels::{
    ConvKernelParams, DepthwiseKernelParams, KernelFlags, PointwiseKernelParams, ELEMENT_SIZE,
    FILTER_SET_SIZE, MAX_POINTWISE_CHANNEL_BATCH,
};
use crate::platform::platform;
use crate::threading::{execute_threaded, max_thread_count, ThreadPool};
use crate::work_block::{partition_work, prepare_work_block, WorkBlock};

const HEIGHT: usize = 0;
const WIDTH: usize = 1;

/// Execution strategy chosen by the entry point.
///
/// The caller must reorder the filter tensor for the strategy that these
/// preconditions select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvAlgorithm {
    /// 1x1 kernel, no padding, blocked input channels.
    Pointwise,
    /// Blocked input channels, arbitrary kernel geometry.
    DirectNchwc,
    /// One input and one output channel per group.
    Depthwise,
    /// Unblocked (NCHW) input channels.
    NchwInput,
}

/// Read-only convolution state shared by all workers of one invocation.
struct ConvContext {
    algorithm: ConvAlgorithm,
    block_size: usize,
    thread_count: usize,

    batch_count: usize,
    /// Channels per group.
    input_channels: usize,
    /// Channels per group.
    output_channels: usize,
    group_count: usize,

    input_height: usize,
    input_width: usize,
    input_size: usize,
    output_height: usize,
    output_width: usize,
    output_size: usize,
    kernel_height: usize,
    kernel_width: usize,
    kernel_size: usize,
    dilation_height: usize,
    dilation_width: usize,
    padding_top: usize,
    padding_left: usize,
    stride_height: usize,
    stride_width: usize,

    output_count_left_pad_y: usize,
    output_count_y: usize,
    output_count_left_pad_x: usize,
    output_count_x: usize,
    output_count_right_pad_x: usize,

    activation: Activation,
    zero_mode: bool,

    input: *const f32,
    filter: *const f32,
    /// Null when the caller supplies no bias.
    bias: *const f32,
    output: *mut f32,
}

// Workers receive disjoint output slices from the partitioner and treat
// everything else as read-only, so sharing the context is sound.
unsafe impl Send for ConvContext {}
unsafe impl Sync for ConvContext {}

impl ConvContext {
    #[allow(clippy::too_many_arguments)]
    fn new(
        work_block: &WorkBlock,
        algorithm: ConvAlgorithm,
        group_count: usize,
        activation: Activation,
        zero_mode: bool,
        block_size: usize,
        input: *const f32,
        filter: *const f32,
        bias: *const f32,
        output: *mut f32,
    ) -> Self {
        Self {
            algorithm,
            block_size,
            thread_count: work_block.thread_count,
            batch_count: work_block.batch_count,
            input_channels: work_block.input_channels,
            output_channels: work_block.output_channels,
            group_count,
            input_height: work_block.input_shape[HEIGHT],
            input_width: work_block.input_shape[WIDTH],
            input_size: work_block.input_size,
            output_height: work_block.output_shape[HEIGHT],
            output_width: work_block.output_shape[WIDTH],
            output_size: work_block.output_size,
            kernel_height: work_block.kernel_shape[HEIGHT],
            kernel_width: work_block.kernel_shape[WIDTH],
            kernel_size: work_block.kernel_shape[HEIGHT] * work_block.kernel_shape[WIDTH],
            dilation_height: work_block.dilation_shape[HEIGHT],
            dilation_width: work_block.dilation_shape[WIDTH],
            padding_top: work_block.padding[HEIGHT],
            padding_left: work_block.padding[WIDTH],
            stride_height: work_block.stride_shape[HEIGHT],
            stride_width: work_block.stride_shape[WIDTH],
            output_count_left_pad_y: work_block.output_count_left_pad[HEIGHT],
            output_count_y: work_block.output_count[HEIGHT],
            output_count_left_pad_x: work_block.output_count_left_pad[WIDTH],
            output_count_x: work_block.output_count[WIDTH],
            output_count_right_pad_x: work_block.output_count_right_pad[WIDTH],
            activation,
            zero_mode,
            input,
            filter,
            bias,
            output,
        }
    }

    fn execute(&self, index: usize) {
        match self.algorithm {
            ConvAlgorithm::Pointwise => self.run_pointwise(index),
            ConvAlgorithm::DirectNchwc => self.run_direct_nchwc(index),
            ConvAlgorithm::Depthwise => self.run_depthwise(index),
            ConvAlgorithm::NchwInput => self.run_nchw(index),
        }
    }

    /// First effective input row and reduced kernel height for output row
    /// `ph`. When the row's receptive field overlaps vertical padding,
    /// leading out-of-range kernel rows advance the first input row and
    /// the filter cursor; trailing ones only shrink the height.
    fn effective_kernel(
        &self,
        ph: usize,
        filter_row_stride: usize,
        filter: &mut *const f32,
    ) -> (usize, usize) {
        let mut ih = (ph * self.stride_height) as isize - self.padding_top as isize;
        let mut effective_kernel_height = self.kernel_height;

        if ph < self.output_count_left_pad_y || ph >= self.output_count_left_pad_y + self.output_count_y
        {
            let mut ih_step = ih;
            for _kh in 0..self.kernel_height {
                if ih_step < 0 || ih_step >= self.input_height as isize {
                    if ih_step == ih {
                        ih += self.dilation_height as isize;
                        *filter = filter.wrapping_add(filter_row_stride);
                    }
                    effective_kernel_height -= 1;
                }
                ih_step += self.dilation_height as isize;
            }
        }

        (ih.max(0) as usize, effective_kernel_height)
    }

    /// Flag byte for one reduction step of the accumulation sequence.
    fn derive_flags(&self, first_reduction: bool, last_reduction: bool) -> KernelFlags {
        let mut flags = KernelFlags::NONE;
        if !first_reduction || !self.zero_mode {
            flags |= KernelFlags::ACCUMULATE_OUTPUT;
        }
        if last_reduction {
            if !self.bias.is_null() {
                flags |= KernelFlags::BIAS_ADDITION;
            }
            if self.activation.is_relu() {
                flags |= KernelFlags::RELU_ACTIVATION;
            } else if !self.activation.is_identity() {
                flags |= KernelFlags::OTHER_ACTIVATION;
            }
        }
        flags
    }

    /// Post-pass for non-fused activations over the strip a kernel just
    /// wrote: `filter_count` blocked planes of `blocked_width` elements.
    fn apply_activation(&self, output: *mut f32, filter_count: usize, blocked_width: usize) {
        unsafe {
            activation::apply_strip(
                &self.activation,
                output,
                filter_count,
                blocked_width,
                self.block_size * self.output_size,
            );
        }
    }

    fn run_direct_nchwc(&self, index: usize) {
        let kernel = platform().conv_nchwc;
        let block = self.block_size;
        let mut it = GroupedConvIterator::prepare(self, index);

        let stride_width = block * self.stride_width * ELEMENT_SIZE;
        let dilation_width = block * self.dilation_width * ELEMENT_SIZE;
        let filter_stride = block * self.input_channels * self.kernel_size * ELEMENT_SIZE;
        let output_stride = block * self.output_size * ELEMENT_SIZE;
        let input_width = block * self.input_width * ELEMENT_SIZE;
        let dilated_input_width = block * self.dilation_height * self.input_width * ELEMENT_SIZE;
        let input_stride = dilated_input_width.wrapping_sub(self.kernel_width * dilation_width);
        let blocked_output_width = block * self.output_width;

        while it.work_remaining > 0 {
            let work_this_iteration = it.work_remaining.min(self.output_height - it.ph);

            let mut ic = 0;
            while ic < self.input_channels {
                let flags = self.derive_flags(ic == 0, ic + block == self.input_channels);
                let input = it.input.wrapping_add(ic * self.input_size);
                let mut output = it.output.wrapping_add(it.ph * blocked_output_width);

                for work in 0..work_this_iteration {
                    let mut filter = it.filter.wrapping_add(block * ic * self.kernel_size);
                    let (ih, effective_kernel_height) = self.effective_kernel(
                        it.ph + work,
                        block * block * self.kernel_width,
                        &mut filter,
                    );
                    let row = input.wrapping_add(block * ih * self.input_width);

                    let params = ConvKernelParams {
                        input: row.wrapping_sub(block * self.padding_left),
                        filter,
                        output,
                        stride_width,
                        dilation_width,
                        filter_count: it.filter_count,
                        input_stride,
                        filter_stride,
                        output_stride,
                        kernel_height: effective_kernel_height,
                        kernel_width: self.kernel_width,
                        input_base: row,
                        input_width,
                        dilated_input_width,
                        output_count_left_pad: self.output_count_left_pad_x,
                        output_count: self.output_count_x,
                        output_count_right_pad: self.output_count_right_pad_x,
                        bias: it.bias,
                        flags,
                    };
                    unsafe { kernel(&params) };

                    if flags.contains(KernelFlags::OTHER_ACTIVATION) {
                        self.apply_activation(output, it.filter_count, blocked_output_width);
                    }

                    output = output.wrapping_add(blocked_output_width);
                }

                ic += block;
            }

            it.complete(self, work_this_iteration);
        }
    }

    fn run_nchw(&self, index: usize) {
        let kernel = platform().conv_nchw;
        let block = self.block_size;
        let mut it = GroupedConvIterator::prepare(self, index);

        let stride_width = self.stride_width * ELEMENT_SIZE;
        let dilation_width = self.dilation_width * ELEMENT_SIZE;
        let filter_stride = block * self.input_channels * self.kernel_size * ELEMENT_SIZE;
        let output_stride = block * self.output_size * ELEMENT_SIZE;
        let input_width = self.input_width * ELEMENT_SIZE;
        let dilated_input_width = self.dilation_height * self.input_width * ELEMENT_SIZE;
        let input_stride = dilated_input_width.wrapping_sub(self.kernel_width * dilation_width);
        let blocked_output_width = block * self.output_width;

        while it.work_remaining > 0 {
            let mut filter = it.filter;
            let (ih, effective_kernel_height) =
                self.effective_kernel(it.ph, block * self.kernel_width, &mut filter);

            let mut input = it.input;
            let output = it.output.wrapping_add(block * it.ph * self.output_width);

            for icc in 0..self.input_channels {
                let flags = self.derive_flags(icc == 0, icc + 1 == self.input_channels);
                let row = input.wrapping_add(ih * self.input_width);

                let params = ConvKernelParams {
                    input: row.wrapping_sub(self.padding_left),
                    filter,
                    output,
                    stride_width,
                    dilation_width,
                    filter_count: it.filter_count,
                    input_stride,
                    filter_stride,
                    output_stride,
                    kernel_height: effective_kernel_height,
                    kernel_width: self.kernel_width,
                    input_base: row,
                    input_width,
                    dilated_input_width,
                    output_count_left_pad: self.output_count_left_pad_x,
                    output_count: self.output_count_x,
                    output_count_right_pad: self.output_count_right_pad_x,
                    bias: it.bias,
                    flags,
                };
                unsafe { kernel(&params) };

                if flags.contains(KernelFlags::OTHER_ACTIVATION) {
                    self.apply_activation(output, it.filter_count, blocked_output_width);
                }

                input = input.wrapping_add(self.input_size);
                filter = filter.wrapping_add(block * self.kernel_size);
            }

            it.complete(self, 1);
        }
    }

    fn run_pointwise(&self, index: usize) {
        let kernel = platform().conv_pointwise;
        let block = self.block_size;
        let mut it = GroupedConvIterator::prepare(self, index);

        let stride_width = block * self.stride_width * ELEMENT_SIZE;
        let input_stride = block * self.input_size * ELEMENT_SIZE;
        let filter_stride = block * self.input_channels * ELEMENT_SIZE;
        let output_stride = block * self.output_size * ELEMENT_SIZE;

        while it.work_remaining > 0 {
            // An unstrided convolution treats the remaining rows as one
            // long line so the kernel can run wider accumulate loops; a
            // strided one emits a single row per iteration.
            let work_this_iteration = if self.stride_height == 1 && self.stride_width == 1 {
                it.work_remaining.min(self.output_height - it.ph)
            } else {
                1
            };
            let output_this_iteration = work_this_iteration * self.output_width;

            let mut input = it
                .input
                .wrapping_add(block * it.ph * self.stride_height * self.input_width);
            let mut filter = it.filter;
            let output = it.output.wrapping_add(block * it.ph * self.output_width);

            let mut ic = 0;
            while ic < self.input_channels {
                let channel_batch =
                    (self.input_channels - ic).min(MAX_POINTWISE_CHANNEL_BATCH);
                let flags = self.derive_flags(ic == 0, ic + channel_batch == self.input_channels);

                let params = PointwiseKernelParams {
                    input,
                    filter,
                    output,
                    stride_width,
                    input_channel_blocks: channel_batch / block,
                    filter_count: it.filter_count,
                    input_stride,
                    filter_stride,
                    output_stride,
                    output_count: output_this_iteration,
                    bias: it.bias,
                    flags,
                };
                unsafe { kernel(&params) };

                if flags.contains(KernelFlags::OTHER_ACTIVATION) {
                    self.apply_activation(output, it.filter_count, block * output_this_iteration);
                }

                input = input.wrapping_add(channel_batch * self.input_size);
                filter = filter.wrapping_add(block * channel_batch);
                ic += channel_batch;
            }

            it.complete(self, work_this_iteration);
        }
    }

    fn run_depthwise(&self, index: usize) {
        let kernel = platform().conv_depthwise;
        let block = self.block_size;

        let group_block_count = (self.group_count + block - 1) / block;
        let total_work = self.batch_count * group_block_count * self.output_height;
        let (work_index, mut work_remaining) =
            partition_work(index, self.thread_count, total_work);

        let mut ph = work_index % self.output_height;
        let batch_group = work_index / self.output_height;
        let mut group = batch_group % group_block_count;

        let mut input = self.input.wrapping_add(batch_group * block * self.input_size);
        let mut output = self.output.wrapping_add(work_index * block * self.output_width);
        let mut filter = self.filter.wrapping_add(group * block * self.kernel_size);
        let mut bias = if self.bias.is_null() {
            self.bias
        } else {
            self.bias.wrapping_add(block * group)
        };

        let stride_width = block * self.stride_width * ELEMENT_SIZE;
        let dilation_width = block * self.dilation_width * ELEMENT_SIZE;
        let input_width = block * self.input_width * ELEMENT_SIZE;
        let dilated_input_width = block * self.dilation_height * self.input_width * ELEMENT_SIZE;
        let input_stride = dilated_input_width.wrapping_sub(self.kernel_width * dilation_width);
        let blocked_output_width = block * self.output_width;

        while work_remaining > 0 {
            let mut filter_row = filter;
            let (ih, effective_kernel_height) =
                self.effective_kernel(ph, block * self.kernel_width, &mut filter_row);

            // Single-pass reduction: the accumulate bit depends only on
            // the caller's zero mode, and the tail flags apply on every
            // output row.
            let mut flags = KernelFlags::NONE;
            if !self.zero_mode {
                flags |= KernelFlags::ACCUMULATE_OUTPUT;
            }
            if !bias.is_null() {
                flags |= KernelFlags::BIAS_ADDITION;
            }
            if self.activation.is_relu() {
                flags |= KernelFlags::RELU_ACTIVATION;
            } else if !self.activation.is_identity() {
                flags |= KernelFlags::OTHER_ACTIVATION;
            }

            let row = input.wrapping_add(block * ih * self.input_width);
            let params = DepthwiseKernelParams {
                input: row.wrapping_sub(block * self.padding_left),
                filter: filter_row,
                output,
                stride_width,
                dilation_width,
                input_stride,
                kernel_height: effective_kernel_height,
                kernel_width: self.kernel_width,
                input_base: row,
                input_width,
                dilated_input_width,
                output_count_left_pad: self.output_count_left_pad_x,
                output_count: self.output_count_x,
                output_count_right_pad: self.output_count_right_pad_x,
                bias,
                flags,
            };
            unsafe { kernel(&params) };

            if flags.contains(KernelFlags::OTHER_ACTIVATION) {
                self.apply_activation(output, 1, blocked_output_width);
            }

            output = output.wrapping_add(blocked_output_width);
            work_remaining -= 1;
            ph += 1;

            if ph == self.output_height {
                input = input.wrapping_add(block * self.input_size);
                filter = filter.wrapping_add(block * self.kernel_size);
                if !bias.is_null() {
                    bias = bias.wrapping_add(block);
                }

                group += 1;
                if group == group_block_count {
                    filter = self.filter;
                    bias = self.bias;
                    group = 0;
                }

                ph = 0;
            }
        }
    }
}

/// Per-worker traversal state for the grouped convolution engines.
///
/// Work units enumerate batch x group x filter-set x output-row with the
/// output row varying fastest. Each filter set clusters up to four
/// blocked filters so a kernel invocation reuses one stretch of input
/// for several output planes.
struct GroupedConvIterator {
    filter_set_count: usize,

    /// Current output row.
    ph: usize,
    filter_set: usize,
    group: usize,
    work_remaining: usize,
    /// Blocked filters in the current set, `1..=FILTER_SET_SIZE`.
    filter_count: usize,

    input: *const f32,
    filter: *const f32,
    bias: *const f32,
    output: *mut f32,
}

impl GroupedConvIterator {
    /// Decompose worker `index`'s starting work unit and advance the
    /// buffer cursors to the slice start.
    fn prepare(ctx: &ConvContext, index: usize) -> Self {
        let block = ctx.block_size;
        let filter_set_count = (ctx.output_channels + block * FILTER_SET_SIZE - 1)
            / (block * FILTER_SET_SIZE);
        let total_work =
            ctx.batch_count * ctx.group_count * filter_set_count * ctx.output_height;
        let (work_index, work_remaining) = partition_work(index, ctx.thread_count, total_work);

        let ph = work_index % ctx.output_height;
        let batch_group_filter_set = work_index / ctx.output_height;
        let filter_set = batch_group_filter_set % filter_set_count;
        let batch_group = batch_group_filter_set / filter_set_count;
        let group = batch_group % ctx.group_count;

        let input = ctx
            .input
            .wrapping_add(batch_group * ctx.input_channels * ctx.input_size);
        let output = ctx
            .output
            .wrapping_add(batch_group * ctx.output_channels * ctx.output_size)
            .wrapping_add(block * filter_set * FILTER_SET_SIZE * ctx.output_size);
        let filter = ctx
            .filter
            .wrapping_add(group * ctx.output_channels * ctx.input_channels * ctx.kernel_size)
            .wrapping_add(
                block * filter_set * FILTER_SET_SIZE * ctx.input_channels * ctx.kernel_size,
            );
        let bias = if ctx.bias.is_null() {
            ctx.bias
        } else {
            ctx.bias
                .wrapping_add(group * ctx.output_channels)
                .wrapping_add(block * filter_set * FILTER_SET_SIZE)
        };

        let mut iterator = Self {
            filter_set_count,
            ph,
            filter_set,
            group,
            work_remaining,
            filter_count: 0,
            input,
            filter,
            bias,
            output,
        };
        iterator.compute_filter_count(ctx);
        iterator
    }

    fn compute_filter_count(&mut self, ctx: &ConvContext) {
        self.filter_count = FILTER_SET_SIZE
            .min(ctx.output_channels / ctx.block_size - self.filter_set * FILTER_SET_SIZE);
    }

    /// Roll the traversal forward by `work_this_iteration` output rows,
    /// stepping the cursors across filter-set, group, and batch
    /// boundaries as they overflow.
    fn complete(&mut self, ctx: &ConvContext, work_this_iteration: usize) {
        self.work_remaining -= work_this_iteration;
        self.ph += work_this_iteration;

        if self.ph == ctx.output_height {
            let blocked_filter_count = ctx.block_size * self.filter_count;

            self.output = self
                .output
                .wrapping_add(blocked_filter_count * ctx.output_size);
            self.filter = self
                .filter
                .wrapping_add(blocked_filter_count * ctx.input_channels * ctx.kernel_size);
            if !self.bias.is_null() {
                self.bias = self.bias.wrapping_add(blocked_filter_count);
            }

            self.filter_set += 1;
            if self.filter_set == self.filter_set_count {
                self.input = self.input.wrapping_add(ctx.input_channels * ctx.input_size);

                self.group += 1;
                if self.group == ctx.group_count {
                    self.filter = ctx.filter;
                    self.bias = ctx.bias;
                    self.group = 0;
                }

                self.filter_set = 0;
            }

            self.compute_filter_count(ctx);
            self.ph = 0;
        }
    }
}

fn checked_buffer(
    len: usize,
    required: usize,
    what: &str,
) -> Result<(), KernelError> {
    if len < required {
        return Err(KernelError::InvalidShape(format!(
            "{what} buffer holds {len} elements, {required} required"
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn validate_conv_buffers(
    work_block: &WorkBlock,
    algorithm: ConvAlgorithm,
    group_count: usize,
    block: usize,
    input_len: usize,
    filter_len: usize,
    bias_len: Option<usize>,
    output_len: usize,
) -> Result<(), KernelError> {
    let kernel_size = work_block.kernel_shape[HEIGHT] * work_block.kernel_shape[WIDTH];

    let (input_required, filter_required, bias_required, output_required) = match algorithm {
        ConvAlgorithm::Depthwise => {
            let group_blocks = (group_count + block - 1) / block;
            (
                work_block.batch_count * group_blocks * block * work_block.input_size,
                group_blocks * block * kernel_size,
                group_blocks * block,
                work_block.batch_count * group_blocks * block * work_block.output_size,
            )
        }
        ConvAlgorithm::Pointwise | ConvAlgorithm::DirectNchwc | ConvAlgorithm::NchwInput => (
            work_block.batch_count
                * group_count
                * work_block.input_channels
                * work_block.input_size,
            group_count * work_block.output_channels * work_block.input_channels * kernel_size,
            group_count * work_block.output_channels,
            work_block.batch_count
                * group_count
                * work_block.output_channels
                * work_block.output_size,
        ),
    };

    checked_buffer(input_len, input_required, "input")?;
    checked_buffer(filter_len, filter_required, "filter")?;
    if let Some(bias_len) = bias_len {
        checked_buffer(bias_len, bias_required, "bias")?;
    }
    checked_buffer(output_len, output_required, "output")?;
    Ok(())
}

/// Two-dimensional grouped convolution over NCHWc tensors.
///
/// `input_shape` and `output_shape` are `[batch, channels, height, width]`
/// logical extents; the buffers use the blocked layout except for the
/// NCHW-input strategy, which reads an unblocked input. The filter must be
/// pre-formatted for the strategy the shape parameters select. With
/// `zero_mode` false the output is accumulated into instead of
/// overwritten.
#[allow(clippy::too_many_arguments)]
pub fn conv(
    dimensions: usize,
    input_shape: &[i64],
    kernel_shape: Option<&[i64]>,
    dilation_shape: Option<&[i64]>,
    padding: Option<&[i64]>,
    stride_shape: Option<&[i64]>,
    output_shape: &[i64],
    group_count: usize,
    input: &[f32],
    filter: &[f32],
    bias: Option<&[f32]>,
    output: &mut [f32],
    activation: &Activation,
    zero_mode: bool,
    pool: Option<&ThreadPool>,
) -> Result<(), KernelError> {
    activation.validate()?;

    let thread_count = max_thread_count(pool);
    let mut work_block = prepare_work_block(
        dimensions,
        input_shape,
        kernel_shape,
        dilation_shape,
        padding,
        stride_shape,
        output_shape,
        thread_count,
    )?;

    if group_count == 0 {
        return Err(KernelError::InvalidShape(
            "group count must be at least one".to_string(),
        ));
    }
    if work_block.input_channels % group_count != 0
        || work_block.output_channels % group_count != 0
    {
        return Err(KernelError::InvalidShape(format!(
            "channel counts ({}, {}) are not divisible by {group_count} groups",
            work_block.input_channels, work_block.output_channels
        )));
    }
    work_block.input_channels /= group_count;
    work_block.output_channels /= group_count;

    let block = platform().block_size;

    let algorithm = if work_block.input_channels >= block {
        if work_block.input_channels % block != 0 || work_block.output_channels % block != 0 {
            return Err(KernelError::InvalidShape(format!(
                "per-group channels ({}, {}) must be multiples of the block size {block}",
                work_block.input_channels, work_block.output_channels
            )));
        }
        if work_block.kernel_shape[HEIGHT] == 1
            && work_block.kernel_shape[WIDTH] == 1
            && work_block.padding[..4].iter().all(|&pad| pad == 0)
        {
            ConvAlgorithm::Pointwise
        } else {
            ConvAlgorithm::DirectNchwc
        }
    } else if work_block.input_channels == 1 && work_block.output_channels == 1 {
        ConvAlgorithm::Depthwise
    } else {
        if work_block.output_channels % block != 0 {
            return Err(KernelError::InvalidShape(format!(
                "per-group output channels {} must be a multiple of the block size {block}",
                work_block.output_channels
            )));
        }
        ConvAlgorithm::NchwInput
    };

    validate_conv_buffers(
        &work_block,
        algorithm,
        group_count,
        block,
        input.len(),
        filter.len(),
        bias.map(|bias| bias.len()),
        output.len(),
    )?;

    log::debug!(
        "conv: {algorithm:?} engine, {group_count} group(s), {} thread(s)",
        work_block.thread_count
    );

    let context = ConvContext::new(
        &work_block,
        algorithm,
        group_count,
        *activation,
        zero_mode,
        block,
        input.as_ptr(),
        filter.as_ptr(),
        bias.map_or(std::ptr::null(), |bias| bias.as_ptr()),
        output.as_mut_ptr(),
    );

    execute_threaded(
        |index| context.execute(index),
        work_block.thread_count,
        pool,
    )
}
