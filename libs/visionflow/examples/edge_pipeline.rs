//! Edge Detection Pipeline Example
//!
//! Builds a gaussian blur, sobel gradient, gradient magnitude pipeline
//! over virtual intermediates, runs it on a synthetic test image, and
//! prints the resulting graph topology as DOT.
//!
//! Usage:
//!   cargo run --example edge_pipeline
//!
//! Set VF_ZONE_MASK=graph,kernel,perf to watch the scheduler work.

use visionflow::kernels;
use visionflow::prelude::*;

fn main() -> visionflow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let ctx = Context::new()?;
    let src = ctx.create_image(64, 64, ImageFormat::U8)?;
    let dst = ctx.create_image(64, 64, ImageFormat::S16)?;

    // vertical step edge down the middle
    let mut patch = src.access_patch(None, 0, AccessMode::WriteOnly)?;
    for y in 0..patch.addr.dim_y {
        for x in 0..patch.addr.dim_x {
            patch.pixel_mut(x, y)[0] = if x < 32 { 0 } else { 255 };
        }
    }
    src.commit_patch(patch)?;

    let graph = ctx.create_graph()?;
    let blur = ctx.create_virtual_image(&graph, 0, 0, ImageFormat::Virt)?;
    let grad_x = ctx.create_virtual_image(&graph, 0, 0, ImageFormat::Virt)?;
    let grad_y = ctx.create_virtual_image(&graph, 0, 0, ImageFormat::Virt)?;

    kernels::gaussian3x3_node(&graph, &src, &blur)?;
    kernels::sobel3x3_node(&graph, &blur, Some(&grad_x), Some(&grad_y))?;
    kernels::magnitude_node(&graph, &grad_x, &grad_y, &dst)?;

    graph.verify()?;
    graph.process()?;

    println!("{}", graph.to_dot()?);

    let patch = dst.access_patch(None, 0, AccessMode::ReadOnly)?;
    let p = patch.pixel(32, 32);
    let response = i16::from_ne_bytes([p[0], p[1]]);
    dst.commit_patch(patch)?;
    println!("edge response at the step: {response}");
    println!("graph avg processing time: {:?}", graph.perf_avg()?);

    Ok(())
}
