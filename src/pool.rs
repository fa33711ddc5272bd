//! Pooling over the NCHWc blocking format.
//!
//! A single engine serves all three pooling kinds; the kind selects the
//! micro-kernel from the platform table. Work units enumerate
//! batch-channel blocks crossed with output rows, and each iteration
//! hands one output row to the kernel together with the effective kernel
//! height and the per-row pad counts.

use crate::error::KernelError;
use crate::kernels::{PoolKernelParams, PoolingKind, ELEMENT_SIZE};
use crate::platform::platform;
use crate::threading::{execute_threaded, max_thread_count, ThreadPool};
use crate::work_block::{partition_work, prepare_work_block, WorkBlock};

const HEIGHT: usize = 0;
const WIDTH: usize = 1;

/// Read-only pooling state shared by all workers of one invocation.
struct PoolContext {
    pooling_kind: PoolingKind,
    block_size: usize,
    thread_count: usize,

    batch_count: usize,
    input_channels: usize,

    input_height: usize,
    input_width: usize,
    input_size: usize,
    output_height: usize,
    output_width: usize,
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

    input: *const f32,
    output: *mut f32,
}

// Workers receive disjoint output slices from the partitioner and treat
// the input as read-only.
unsafe impl Send for PoolContext {}
unsafe impl Sync for PoolContext {}

impl PoolContext {
    fn new(
        work_block: &WorkBlock,
        pooling_kind: PoolingKind,
        block_size: usize,
        input: *const f32,
        output: *mut f32,
    ) -> Self {
        Self {
            pooling_kind,
            block_size,
            thread_count: work_block.thread_count,
            batch_count: work_block.batch_count,
            input_channels: work_block.input_channels,
            input_height: work_block.input_shape[HEIGHT],
            input_width: work_block.input_shape[WIDTH],
            input_size: work_block.input_size,
            output_height: work_block.output_shape[HEIGHT],
            output_width: work_block.output_shape[WIDTH],
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
            input,
            output,
        }
    }

    /// First effective input row and reduced kernel height for output row
    /// `ph`, excluding kernel rows that fall in vertical padding.
    fn effective_kernel(&self, ph: usize) -> (usize, usize) {
        let mut ih = (ph * self.stride_height) as isize - self.padding_top as isize;
        let mut effective_kernel_height = self.kernel_height;

        if ph < self.output_count_left_pad_y || ph >= self.output_count_left_pad_y + self.output_count_y
        {
            let mut ih_step = ih;
            for _kh in 0..self.kernel_height {
                if ih_step < 0 || ih_step >= self.input_height as isize {
                    if ih_step == ih {
                        ih += self.dilation_height as isize;
                    }
                    effective_kernel_height -= 1;
                }
                ih_step += self.dilation_height as isize;
            }
        }

        (ih.max(0) as usize, effective_kernel_height)
    }

    fn execute(&self, index: usize) {
        let kernel = platform().pool_kernel(self.pooling_kind);
        let block = self.block_size;

        let channel_blocks =
            (self.batch_count * self.input_channels + block - 1) / block;
        let total_work = channel_blocks * self.output_height;
        let (work_index, mut work_remaining) =
            partition_work(index, self.thread_count, total_work);

        let mut ph = work_index % self.output_height;
        let batch_channel = work_index / self.output_height;

        let mut input = self
            .input
            .wrapping_add(batch_channel * block * self.input_size);
        let mut output = self
            .output
            .wrapping_add(work_index * block * self.output_width);

        let stride_width = block * self.stride_width * ELEMENT_SIZE;
        let dilation_width = block * self.dilation_width * ELEMENT_SIZE;
        let input_width = block * self.input_width * ELEMENT_SIZE;
        let dilated_input_width = block * self.dilation_height * self.input_width * ELEMENT_SIZE;
        let input_stride = dilated_input_width.wrapping_sub(self.kernel_width * dilation_width);

        while work_remaining > 0 {
            let (ih, effective_kernel_height) = self.effective_kernel(ph);
            let row = input.wrapping_add(block * ih * self.input_width);

            let params = PoolKernelParams {
                input: row.wrapping_sub(block * self.padding_left),
                output,
                stride_width,
                dilation_width,
                input_stride,
                kernel_size: self.kernel_size,
                kernel_height: effective_kernel_height,
                kernel_width: self.kernel_width,
                input_base: row,
                input_width,
                dilated_input_width,
                output_count_left_pad: self.output_count_left_pad_x,
                output_count: self.output_count_x,
                output_count_right_pad: self.output_count_right_pad_x,
            };
            unsafe { kernel(&params) };

            output = output.wrapping_add(block * self.output_width);
            work_remaining -= 1;
            ph += 1;

            if ph == self.output_height {
                input = input.wrapping_add(block * self.input_size);
                ph = 0;
            }
        }
    }
}

/// Two-dimensional pooling over an NCHWc tensor.
///
/// An omitted `kernel_shape` defaults to the input extents, turning the
/// call into a global pooling. The channel count may include a trailing
/// partial block; the buffers must cover the block-padded extent.
#[allow(clippy::too_many_arguments)]
pub fn pool(
    pooling_kind: PoolingKind,
    dimensions: usize,
    input_shape: &[i64],
    kernel_shape: Option<&[i64]>,
    dilation_shape: Option<&[i64]>,
    padding: Option<&[i64]>,
    stride_shape: Option<&[i64]>,
    output_shape: &[i64],
    input: &[f32],
    output: &mut [f32],
    pool: Option<&ThreadPool>,
) -> Result<(), KernelError> {
    let thread_count = max_thread_count(pool);
    let work_block = prepare_work_block(
        dimensions,
        input_shape,
        kernel_shape,
        dilation_shape,
        padding,
        stride_shape,
        output_shape,
        thread_count,
    )?;

    if work_block.output_channels != work_block.input_channels {
        return Err(KernelError::InvalidShape(format!(
            "pooling preserves the channel count, got {} in and {} out",
            work_block.input_channels, work_block.output_channels
        )));
    }

    let block = platform().block_size;
    let channel_blocks =
        (work_block.batch_count * work_block.input_channels + block - 1) / block;

    let input_required = channel_blocks * block * work_block.input_size;
    if input.len() < input_required {
        return Err(KernelError::InvalidShape(format!(
            "input buffer holds {} elements, {input_required} required",
            input.len()
        )));
    }
    let output_required = channel_blocks * block * work_block.output_size;
    if output.len() < output_required {
        return Err(KernelError::InvalidShape(format!(
            "output buffer holds {} elements, {output_required} required",
            output.len()
        )));
    }

    log::debug!(
        "pool: {pooling_kind} kernel, {channel_blocks} channel block(s), {} thread(s)",
        work_block.thread_count
    );

    let context = PoolContext::new(
        &work_block,
        pooling_kind,
        block,
        input.as_ptr(),
        output.as_mut_ptr(),
    );

    execute_threaded(
        |index| context.execute(index),
        work_block.thread_count,
        pool,
    )
}
