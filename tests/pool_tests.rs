//! End-to-end pooling tests against a naive reference.

mod common;

use common::*;
use nchwc_kernels::{block_size, pool, KernelError, PoolingKind, ThreadPool};

fn run_pool(
    input: &Logical,
    kind: PoolingKind,
    geometry: ConvGeometry,
    kernel_shape: Option<(usize, usize)>,
    thread_pool: Option<&ThreadPool>,
) -> Logical {
    let block = block_size();
    let (output_height, output_width) = geometry.output_extent((input.height, input.width));

    let packed_input = pack_nchwc(input, block);
    let blocks = (input.batch * input.channels + block - 1) / block;
    let mut packed_output = vec![0.0f32; blocks * block * output_height * output_width];

    let kernel: Option<[i64; 2]> =
        kernel_shape.map(|(height, width)| [height as i64, width as i64]);

    pool(
        kind,
        2,
        &[
            input.batch as i64,
            input.channels as i64,
            input.height as i64,
            input.width as i64,
        ],
        kernel.as_ref().map(|kernel| &kernel[..]),
        Some(&[geometry.dilation.0 as i64, geometry.dilation.1 as i64]),
        Some(&[
            geometry.padding.0 as i64,
            geometry.padding.1 as i64,
            geometry.padding.2 as i64,
            geometry.padding.3 as i64,
        ]),
        Some(&[geometry.stride.0 as i64, geometry.stride.1 as i64]),
        &[
            input.batch as i64,
            input.channels as i64,
            output_height as i64,
            output_width as i64,
        ],
        &packed_input,
        &mut packed_output,
        thread_pool,
    )
    .unwrap();

    unpack_nchwc(
        &packed_output,
        input.batch,
        input.channels,
        output_height,
        output_width,
        block,
    )
}

fn pool_geometry(
    kernel: (usize, usize),
    padding: (usize, usize, usize, usize),
    stride: (usize, usize),
) -> ConvGeometry {
    ConvGeometry {
        kernel,
        dilation: (1, 1),
        padding,
        stride,
        groups: 1,
    }
}

#[test]
fn average_2x2_stride_2_is_blockwise_mean() {
    let input = Logical::random(1, 8, 8, 8, 31);
    let geometry = pool_geometry((2, 2), (0, 0, 0, 0), (2, 2));

    let actual = run_pool(
        &input,
        PoolingKind::AverageIncludePad,
        geometry,
        Some((2, 2)),
        None,
    );
    assert_eq!(actual.height, 4);
    assert_eq!(actual.width, 4);

    for c in 0..8 {
        for oh in 0..4 {
            for ow in 0..4 {
                let mean = (input.at(0, c, 2 * oh, 2 * ow)
                    + input.at(0, c, 2 * oh, 2 * ow + 1)
                    + input.at(0, c, 2 * oh + 1, 2 * ow)
                    + input.at(0, c, 2 * oh + 1, 2 * ow + 1))
                    / 4.0;
                let value = actual.at(0, c, oh, ow);
                assert!(
                    (value - mean).abs() < 1e-5,
                    "channel {c} at [{oh}][{ow}]: {value} vs {mean}"
                );
            }
        }
    }

    // With no padding, the exclude-pad average is identical.
    let exclude = run_pool(
        &input,
        PoolingKind::AverageExcludePad,
        geometry,
        Some((2, 2)),
        None,
    );
    assert_eq!(actual.values, exclude.values);
}

#[test]
fn max_1x1_reproduces_input() {
    let input = Logical::random(1, 16, 5, 7, 41);
    let geometry = pool_geometry((1, 1), (0, 0, 0, 0), (1, 1));

    let actual = run_pool(&input, PoolingKind::Maximum, geometry, Some((1, 1)), None);
    assert_close(&actual, &input, 0.0);
}

#[test]
fn max_3x3_with_padding_matches_reference() {
    let input = Logical::random(2, 16, 9, 7, 51);
    let geometry = pool_geometry((3, 3), (1, 1, 1, 1), (2, 2));

    let actual = run_pool(&input, PoolingKind::Maximum, geometry, Some((3, 3)), None);
    let expected = reference_pool(&input, ReferencePoolKind::Maximum, geometry);
    assert_close(&actual, &expected, 1e-6);
}

#[test]
fn average_variants_differ_on_padded_edges() {
    let input = Logical::random(1, 8, 6, 6, 61);
    let geometry = pool_geometry((3, 3), (1, 1, 1, 1), (1, 1));

    let include = run_pool(
        &input,
        PoolingKind::AverageIncludePad,
        geometry,
        Some((3, 3)),
        None,
    );
    let expected_include =
        reference_pool(&input, ReferencePoolKind::AverageIncludePad, geometry);
    assert_close(&include, &expected_include, 1e-5);

    let exclude = run_pool(
        &input,
        PoolingKind::AverageExcludePad,
        geometry,
        Some((3, 3)),
        None,
    );
    let expected_exclude =
        reference_pool(&input, ReferencePoolKind::AverageExcludePad, geometry);
    assert_close(&exclude, &expected_exclude, 1e-5);

    // A corner receptive field spans four valid cells out of nine, so
    // the corner averages relate by the divisor ratio.
    let corner_include = include.at(0, 0, 0, 0);
    let corner_exclude = exclude.at(0, 0, 0, 0);
    assert!(
        (corner_exclude * 4.0 - corner_include * 9.0).abs() < 1e-4,
        "corner divisors inconsistent: include {corner_include}, exclude {corner_exclude}"
    );
}

#[test]
fn dilated_max_pooling_matches_reference() {
    let input = Logical::random(1, 8, 10, 10, 71);
    let geometry = ConvGeometry {
        kernel: (3, 3),
        dilation: (2, 2),
        padding: (2, 2, 2, 2),
        stride: (1, 1),
        groups: 1,
    };

    let actual = run_pool(&input, PoolingKind::Maximum, geometry, Some((3, 3)), None);
    let expected = reference_pool(&input, ReferencePoolKind::Maximum, geometry);
    assert_close(&actual, &expected, 1e-6);
}

#[test]
fn omitted_kernel_shape_pools_globally() {
    let input = Logical::random(2, 8, 5, 6, 81);
    let geometry = pool_geometry((5, 6), (0, 0, 0, 0), (1, 1));

    let actual = run_pool(&input, PoolingKind::Maximum, geometry, None, None);
    assert_eq!(actual.height, 1);
    assert_eq!(actual.width, 1);
    let expected = reference_pool(&input, ReferencePoolKind::Maximum, geometry);
    assert_close(&actual, &expected, 1e-6);
}

#[test]
fn partial_channel_block_is_supported() {
    let block = block_size();
    let channels = block + 3;
    let input = Logical::random(1, channels, 6, 6, 91);
    let geometry = pool_geometry((2, 2), (0, 0, 0, 0), (2, 2));

    let actual = run_pool(
        &input,
        PoolingKind::AverageIncludePad,
        geometry,
        Some((2, 2)),
        None,
    );
    let expected = reference_pool(&input, ReferencePoolKind::AverageIncludePad, geometry);
    assert_close(&actual, &expected, 1e-5);
}

#[test]
fn thread_count_does_not_change_results() {
    let single = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap();
    let quad = rayon::ThreadPoolBuilder::new()
        .num_threads(4)
        .build()
        .unwrap();

    let input = Logical::random(2, 16, 9, 9, 101);
    let geometry = pool_geometry((3, 3), (1, 1, 1, 1), (2, 2));

    for kind in [
        PoolingKind::Maximum,
        PoolingKind::AverageExcludePad,
        PoolingKind::AverageIncludePad,
    ] {
        let from_single = run_pool(&input, kind, geometry, Some((3, 3)), Some(&single));
        let from_quad = run_pool(&input, kind, geometry, Some((3, 3)), Some(&quad));
        assert_eq!(from_single.values, from_quad.values, "kind {kind:?} diverged");
    }
}

#[test]
fn channel_mismatch_is_rejected() {
    let result = pool(
        PoolingKind::Maximum,
        2,
        &[1, 8, 4, 4],
        Some(&[2, 2]),
        None,
        None,
        Some(&[2, 2]),
        &[1, 16, 2, 2],
        &[0.0; 128],
        &mut [0.0; 64],
        None,
    );
    assert!(matches!(result, Err(KernelError::InvalidShape(_))));
}

#[test]
fn short_input_buffer_is_rejected() {
    let result = pool(
        PoolingKind::Maximum,
        2,
        &[1, 8, 4, 4],
        Some(&[2, 2]),
        None,
        None,
        Some(&[2, 2]),
        &[1, 8, 2, 2],
        &[0.0; 16],
        &mut [0.0; 32],
        None,
    );
    assert!(matches!(result, Err(KernelError::InvalidShape(_))));
}
