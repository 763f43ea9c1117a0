//! Pipelines through the built-in kernel library, driven entirely over
//! the public API.

use visionflow::kernels;
use visionflow::prelude::*;

fn fill(img: &Image, f: impl Fn(u32, u32) -> u8) {
    let mut patch = img.access_patch(None, 0, AccessMode::WriteOnly).unwrap();
    for y in 0..patch.addr.dim_y {
        for x in 0..patch.addr.dim_x {
            patch.pixel_mut(x, y)[0] = f(x, y);
        }
    }
    img.commit_patch(patch).unwrap();
}

fn pixel_u8(img: &Image, x: u32, y: u32) -> u8 {
    let patch = img.access_patch(None, 0, AccessMode::ReadOnly).unwrap();
    let v = patch.pixel(x, y)[0];
    img.commit_patch(patch).unwrap();
    v
}

fn pixel_s16(img: &Image, x: u32, y: u32) -> i16 {
    let patch = img.access_patch(None, 0, AccessMode::ReadOnly).unwrap();
    let p = patch.pixel(x, y);
    let v = i16::from_ne_bytes([p[0], p[1]]);
    img.commit_patch(patch).unwrap();
    v
}

#[test]
fn threshold_splits_at_the_value() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let thresh = ctx.create_threshold(ThresholdKind::Binary).unwrap();
    thresh.set_value(100).unwrap();
    fill(&src, |x, _| if x < 4 { 50 } else { 200 });

    kernels::threshold_node(&graph, &src, &thresh, &dst).unwrap();
    graph.process().unwrap();

    assert_eq!(pixel_u8(&dst, 1, 1), 0);
    assert_eq!(pixel_u8(&dst, 6, 1), 255);
}

#[test]
fn range_threshold_uses_both_bounds() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    let dst = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    let thresh = ctx.create_threshold(ThresholdKind::Range).unwrap();
    thresh.set_bounds(10, 20).unwrap();
    fill(&src, |x, _| (x * 10) as u8); // 0, 10, 20, 30

    kernels::threshold_node(&graph, &src, &thresh, &dst).unwrap();
    graph.process().unwrap();

    assert_eq!(pixel_u8(&dst, 0, 0), 0);
    assert_eq!(pixel_u8(&dst, 1, 0), 255);
    assert_eq!(pixel_u8(&dst, 2, 0), 255);
    assert_eq!(pixel_u8(&dst, 3, 0), 0);
}

#[test]
fn table_lookup_remaps_every_pixel() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let lut = ctx.create_lut(256).unwrap();
    let table: Vec<u8> = (0..=255u8).rev().collect();
    lut.write(&table).unwrap();
    fill(&src, |x, y| (x + y) as u8);

    kernels::table_lookup_node(&graph, &src, &lut, &dst).unwrap();
    graph.process().unwrap();

    assert_eq!(pixel_u8(&dst, 3, 4), 255 - 7);
}

#[test]
fn histogram_counts_in_range_pixels() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    // 4 bins of width 32 starting at 64; pixels below 64 fall outside
    let dist = ctx.create_distribution(4, 64, 128).unwrap();
    fill(&src, |x, _| if x < 2 { 0 } else { 64 + (x as u8 - 2) * 20 });

    kernels::histogram_node(&graph, &src, &dist).unwrap();
    graph.process().unwrap();

    let freqs = dist.read_frequencies().unwrap();
    assert_eq!(freqs.len(), 4);
    // columns 0..2 are out of range, 8 pixels per remaining column
    assert_eq!(freqs.iter().sum::<u32>(), 6 * 8);
    // columns 2 and 3 hold 64 and 84, both in bin 0
    assert_eq!(freqs[0], 2 * 8);
}

#[test]
fn convolve_with_identity_coefficients() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let dst = ctx.create_image(8, 8, ImageFormat::S16).unwrap();
    let conv = ctx.create_convolution(3, 3).unwrap();
    let mut coeffs = [0i16; 9];
    coeffs[4] = 1;
    conv.write_coefficients(&coeffs).unwrap();
    fill(&src, |x, y| (x * 8 + y) as u8);

    kernels::convolve_node(&graph, &src, &conv, &dst).unwrap();
    graph.process().unwrap();

    // interior pixels pass straight through, the undefined border is
    // skipped
    assert_eq!(pixel_s16(&dst, 3, 5), 3 * 8 + 5);
    assert_eq!(pixel_s16(&dst, 0, 0), 0);
}

#[test]
fn convolve_scale_divides_the_sum() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let dst = ctx.create_image(8, 8, ImageFormat::S16).unwrap();
    let conv = ctx.create_convolution(3, 3).unwrap();
    conv.write_coefficients(&[1; 9]).unwrap();
    conv.set_scale(4).unwrap();
    fill(&src, |_, _| 100);

    kernels::convolve_node(&graph, &src, &conv, &dst).unwrap();
    graph.process().unwrap();

    assert_eq!(pixel_s16(&dst, 4, 4), 9 * 100 / 4);
}

#[test]
fn sobel_outputs_are_optional() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let gx = ctx.create_image(8, 8, ImageFormat::S16).unwrap();
    fill(&src, |x, _| if x < 4 { 0 } else { 255 });

    kernels::sobel3x3_node(&graph, &src, Some(&gx), None).unwrap();
    graph.verify().unwrap();
    graph.process().unwrap();
    assert!(pixel_s16(&gx, 4, 4) > 0);
}

#[test]
fn accumulate_sums_across_runs() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    let acc = ctx.create_image(4, 4, ImageFormat::S16).unwrap();
    fill(&src, |_, _| 7);

    kernels::accumulate_node(&graph, &src, &acc).unwrap();
    graph.verify().unwrap();
    graph.process().unwrap();
    graph.process().unwrap();
    graph.process().unwrap();

    assert_eq!(pixel_s16(&acc, 2, 2), 21);
}

#[test]
fn replicate_border_fills_the_frame() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    fill(&src, |_, _| 80);

    let node = kernels::box3x3_node(&graph, &src, &dst).unwrap();
    node.set_border_mode(BorderMode::Replicate).unwrap();
    graph.process().unwrap();

    // a constant image stays constant all the way to the corners
    assert_eq!(pixel_u8(&dst, 0, 0), 80);
    assert_eq!(pixel_u8(&dst, 7, 7), 80);
}

#[test]
fn undefined_border_skips_the_frame() {
    let ctx = Context::new().unwrap();
    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    fill(&src, |_, _| 80);

    kernels::box3x3_node(&graph, &src, &dst).unwrap();
    graph.process().unwrap();

    assert_eq!(pixel_u8(&dst, 0, 0), 0);
    assert_eq!(pixel_u8(&dst, 4, 4), 80);
}

#[test]
fn user_kernel_runs_like_a_builtin() {
    let ctx = Context::new().unwrap();
    ctx.add_kernel(
        "com.example.invert",
        0x9001,
        2,
        |call| {
            let input = call.read_image(0)?;
            let mut out = ImageData::new(input.width, input.height, ImageFormat::U8);
            for y in 0..input.planes[0].dim_y {
                for x in 0..input.planes[0].dim_x {
                    out.planes[0].set_u8(x, y, 255 - input.planes[0].get_u8(x, y));
                }
            }
            call.write_image(1, &out)
        },
        visionflow::core::kernel::accept_any_input,
        |call, _index, meta| {
            let info = call.image_info(0)?;
            *meta = MetaFormat::Image {
                width: info.width,
                height: info.height,
                format: ImageFormat::U8,
            };
            Ok(())
        },
    )
    .parameter(Direction::Input, RefKind::Image, ParamState::Required)
    .parameter(Direction::Output, RefKind::Image, ParamState::Required)
    .finalize()
    .unwrap();

    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    let dst = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    fill(&src, |x, _| x as u8);

    let node = graph.create_node_by_name("com.example.invert").unwrap();
    node.set_parameter(0, &src).unwrap();
    node.set_parameter(1, &dst).unwrap();
    graph.process().unwrap();

    assert_eq!(pixel_u8(&dst, 5, 3), 250);
}

#[test]
fn kernel_failure_reaches_the_caller() {
    let ctx = Context::new().unwrap();
    ctx.add_kernel(
        "com.example.broken",
        0x9002,
        1,
        |_call| Err(VxError::Failure("deliberate".into())),
        visionflow::core::kernel::accept_any_input,
        |_call, _index, _meta| Ok(()),
    )
    .parameter(Direction::Input, RefKind::Image, ParamState::Required)
    .finalize()
    .unwrap();

    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    let node = graph.create_node_by_name("com.example.broken").unwrap();
    node.set_parameter(0, &src).unwrap();

    assert!(matches!(graph.process(), Err(VxError::Failure(_))));
    assert_eq!(node.status().unwrap().as_deref(), Some("operation failed: deliberate"));
}

#[test]
fn log_callback_sees_verification_failures() {
    use std::sync::mpsc;

    let ctx = Context::new().unwrap();
    let (tx, rx) = mpsc::channel();
    ctx.register_log_callback(move |entry| {
        let _ = tx.send(entry.message.clone());
    });

    let graph = ctx.create_graph().unwrap();
    let src = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    let node = graph.create_node_by_name("org.visionflow.copy").unwrap();
    node.set_parameter(0, &src).unwrap();
    assert!(graph.verify().is_err());

    let message = rx.try_recv().expect("a log entry for the failed verify");
    assert!(message.contains("verification failed"), "got {message:?}");
    ctx.clear_log_callback();
}

#[test]
fn duplicate_kernel_names_are_rejected() {
    let ctx = Context::new().unwrap();
    let r = ctx
        .add_kernel(
            "org.visionflow.copy",
            0x9003,
            1,
            |_call| Ok(()),
            visionflow::core::kernel::accept_any_input,
            |_call, _index, _meta| Ok(()),
        )
        .parameter(Direction::Input, RefKind::Image, ParamState::Required)
        .finalize();
    assert!(matches!(r, Err(VxError::InvalidParameters(_))));
}
