//! Geometric pre-pass shared by convolution and pooling.
//!
//! `prepare_work_block` turns the caller's shape description into the
//! per-axis output partition consumed by the engines: for each spatial
//! axis the output positions split into a left/top-pad region, a full
//! region whose receptive fields lie entirely inside the input, and a
//! right/bottom-pad region. `partition_work` then divides the engine's
//! work units evenly across worker indices.

use crate::error::KernelError;

/// Spatial slots carried by the work block. The engines only index the
/// first two (height and width).
pub const MAX_SPATIAL_DIMENSIONS: usize = 3;

/// Shape description shared by one convolution or pooling invocation,
/// immutable once built.
#[derive(Debug, Clone)]
pub struct WorkBlock {
    pub thread_count: usize,
    pub batch_count: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub input_shape: [usize; MAX_SPATIAL_DIMENSIONS],
    pub output_shape: [usize; MAX_SPATIAL_DIMENSIONS],
    pub kernel_shape: [usize; MAX_SPATIAL_DIMENSIONS],
    pub dilation_shape: [usize; MAX_SPATIAL_DIMENSIONS],
    /// Leading pads at `[dim]`, trailing pads at `[dim + dimensions]`.
    pub padding: [usize; 2 * MAX_SPATIAL_DIMENSIONS],
    pub stride_shape: [usize; MAX_SPATIAL_DIMENSIONS],
    pub input_size: usize,
    pub output_size: usize,
    pub output_count_left_pad: [usize; MAX_SPATIAL_DIMENSIONS],
    pub output_count: [usize; MAX_SPATIAL_DIMENSIONS],
    pub output_count_right_pad: [usize; MAX_SPATIAL_DIMENSIONS],
}

fn non_negative(value: i64, what: &str) -> Result<usize, KernelError> {
    usize::try_from(value)
        .map_err(|_| KernelError::InvalidShape(format!("{what} must be non-negative, got {value}")))
}

fn positive(value: i64, what: &str) -> Result<usize, KernelError> {
    let value = non_negative(value, what)?;
    if value == 0 {
        return Err(KernelError::InvalidShape(format!(
            "{what} must be at least one"
        )));
    }
    Ok(value)
}

fn expect_len(values: Option<&[i64]>, len: usize, what: &str) -> Result<(), KernelError> {
    if let Some(values) = values {
        if values.len() != len {
            return Err(KernelError::InvalidShape(format!(
                "{what} has {} entries, expected {len}",
                values.len()
            )));
        }
    }
    Ok(())
}

/// Build the work block for one invocation.
///
/// `input_shape` and `output_shape` are `[batch, channels, spatial...]`;
/// the optional arrays cover the spatial axes only, with `padding` laid
/// out as all leading pads followed by all trailing pads. Omitted arrays
/// default to a kernel matching the input extents (global pooling),
/// unit dilation and stride, and zero padding.
#[allow(clippy::too_many_arguments)]
pub fn prepare_work_block(
    dimensions: usize,
    input_shape: &[i64],
    kernel_shape: Option<&[i64]>,
    dilation_shape: Option<&[i64]>,
    padding: Option<&[i64]>,
    stride_shape: Option<&[i64]>,
    output_shape: &[i64],
    thread_count: usize,
) -> Result<WorkBlock, KernelError> {
    if dimensions != 2 {
        return Err(KernelError::InvalidShape(format!(
            "only two spatial dimensions are supported, got {dimensions}"
        )));
    }
    if thread_count == 0 {
        return Err(KernelError::InvalidShape(
            "thread count must be at least one".to_string(),
        ));
    }
    if input_shape.len() != dimensions + 2 {
        return Err(KernelError::InvalidShape(format!(
            "input shape has {} entries, expected {}",
            input_shape.len(),
            dimensions + 2
        )));
    }
    if output_shape.len() != dimensions + 2 {
        return Err(KernelError::InvalidShape(format!(
            "output shape has {} entries, expected {}",
            output_shape.len(),
            dimensions + 2
        )));
    }
    expect_len(kernel_shape, dimensions, "kernel shape")?;
    expect_len(dilation_shape, dimensions, "dilation shape")?;
    expect_len(padding, 2 * dimensions, "padding")?;
    expect_len(stride_shape, dimensions, "stride shape")?;

    let batch_count = non_negative(input_shape[0], "batch count")?;
    if output_shape[0] != input_shape[0] {
        return Err(KernelError::InvalidShape(format!(
            "output batch count {} differs from input batch count {}",
            output_shape[0], input_shape[0]
        )));
    }

    let mut block = WorkBlock {
        thread_count,
        batch_count,
        input_channels: non_negative(input_shape[1], "input channel count")?,
        output_channels: non_negative(output_shape[1], "output channel count")?,
        input_shape: [0; MAX_SPATIAL_DIMENSIONS],
        output_shape: [0; MAX_SPATIAL_DIMENSIONS],
        kernel_shape: [0; MAX_SPATIAL_DIMENSIONS],
        dilation_shape: [1; MAX_SPATIAL_DIMENSIONS],
        padding: [0; 2 * MAX_SPATIAL_DIMENSIONS],
        stride_shape: [1; MAX_SPATIAL_DIMENSIONS],
        input_size: 1,
        output_size: 1,
        output_count_left_pad: [0; MAX_SPATIAL_DIMENSIONS],
        output_count: [0; MAX_SPATIAL_DIMENSIONS],
        output_count_right_pad: [0; MAX_SPATIAL_DIMENSIONS],
    };

    let spatial_input = &input_shape[2..];
    let spatial_output = &output_shape[2..];

    for dim in 0..dimensions {
        let input_value = positive(spatial_input[dim], "input extent")?;
        let output_value = non_negative(spatial_output[dim], "output extent")?;

        block.input_shape[dim] = input_value;
        block.output_shape[dim] = output_value;
        block.input_size *= input_value;
        block.output_size *= output_value;

        block.kernel_shape[dim] = match kernel_shape {
            Some(values) => positive(values[dim], "kernel extent")?,
            None => input_value,
        };
        block.dilation_shape[dim] = match dilation_shape {
            Some(values) => positive(values[dim], "dilation")?,
            None => 1,
        };
        if let Some(values) = padding {
            block.padding[dim] = non_negative(values[dim], "padding")?;
            block.padding[dim + dimensions] = non_negative(values[dim + dimensions], "padding")?;
        }
        block.stride_shape[dim] = match stride_shape {
            Some(values) => positive(values[dim], "stride")?,
            None => 1,
        };

        let span_value = block.dilation_shape[dim] * (block.kernel_shape[dim] - 1) + 1;
        let stride_value = block.stride_shape[dim];
        let padding_left_value = block.padding[dim];
        let padding_right_value = block.padding[dim + dimensions];

        if padding_left_value >= span_value || padding_right_value >= span_value {
            return Err(KernelError::InvalidShape(format!(
                "padding ({padding_left_value}, {padding_right_value}) covers the entire kernel \
                 span {span_value} on axis {dim}"
            )));
        }

        let output_count_full = if input_value >= span_value {
            (input_value - span_value) / stride_value + 1
        } else {
            0
        };

        let output_count_with_left_pad = if input_value + padding_left_value >= span_value {
            (input_value + padding_left_value - span_value) / stride_value + 1
        } else {
            output_value
        };

        let mut output_count_left_pad = output_count_with_left_pad - output_count_full;
        let mut output_count = output_count_full;

        // A left pad must surface at least one padded output position so
        // the bounds-checked kernel path is exercised; borrow one from
        // the full region.
        if output_count_left_pad == 0 && padding_left_value > 0 {
            output_count_left_pad = 1;
            output_count = output_count.checked_sub(1).ok_or_else(|| {
                KernelError::InvalidShape(format!(
                    "output extent {output_value} leaves no room for the padded output \
                     position on axis {dim}"
                ))
            })?;
        }

        let output_count_right_pad = output_value
            .checked_sub(output_count_with_left_pad)
            .ok_or_else(|| {
                KernelError::InvalidShape(format!(
                    "output extent {output_value} is smaller than the {output_count_with_left_pad} \
                     derived output positions on axis {dim}"
                ))
            })?;

        block.output_count_left_pad[dim] = output_count_left_pad;
        block.output_count[dim] = output_count;
        block.output_count_right_pad[dim] = output_count_right_pad;
    }

    Ok(block)
}

/// Slice of `[0, total_work)` owned by worker `index`: `(start, length)`.
///
/// The first `total_work % thread_count` workers receive one extra unit;
/// the union of all slices covers the range exactly once.
pub fn partition_work(index: usize, thread_count: usize, total_work: usize) -> (usize, usize) {
    let work_per_thread = total_work / thread_count;
    let work_per_thread_extra = total_work % thread_count;

    if index < work_per_thread_extra {
        ((work_per_thread + 1) * index, work_per_thread + 1)
    } else {
        (work_per_thread * index + work_per_thread_extra, work_per_thread)
    }
}
