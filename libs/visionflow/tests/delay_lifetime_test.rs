//! Delay rings bound into graphs, and the cascading lifetime rules
//! that tie delays, pyramids and graphs together.

use visionflow::kernels;
use visionflow::prelude::*;

fn fill(img: &Image, value: u8) {
    let mut patch = img.access_patch(None, 0, AccessMode::WriteOnly).unwrap();
    for y in 0..patch.addr.dim_y {
        for x in 0..patch.addr.dim_x {
            patch.pixel_mut(x, y)[0] = value;
        }
    }
    img.commit_patch(patch).unwrap();
}

fn pixel(img: &Image, x: u32, y: u32) -> u8 {
    let patch = img.access_patch(None, 0, AccessMode::ReadOnly).unwrap();
    let v = patch.pixel(x, y)[0];
    img.commit_patch(patch).unwrap();
    v
}

#[test]
fn aging_rebinds_node_parameters() {
    let ctx = Context::new().unwrap();
    let exemplar = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    let delay = ctx.create_delay(&exemplar, 3).unwrap();
    exemplar.release().unwrap();

    let newest = delay.reference(0).unwrap().into_image().unwrap();
    fill(&newest, 10);
    fill(&delay.reference(-1).unwrap().into_image().unwrap(), 20);
    fill(&delay.reference(-2).unwrap().into_image().unwrap(), 30);

    let graph = ctx.create_graph().unwrap();
    let out = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    kernels::copy_node(&graph, &newest, &out).unwrap();
    graph.verify().unwrap();
    graph.process().unwrap();
    assert_eq!(pixel(&out, 0, 0), 10);

    // Aging swaps the ring under the node without touching the
    // verified state. The node bound at age 0 comes out holding the
    // object that sat one slot behind it.
    delay.age().unwrap();
    assert!(graph.is_verified().unwrap());
    graph.process().unwrap();
    assert_eq!(pixel(&out, 0, 0), 20);

    delay.age().unwrap();
    graph.process().unwrap();
    assert_eq!(pixel(&out, 0, 0), 30);
}

#[test]
fn scalar_delay_rotates_values() {
    let ctx = Context::new().unwrap();
    let exemplar = ctx.create_scalar(ScalarValue::I32(0)).unwrap();
    let delay = ctx.create_delay(&exemplar, 3).unwrap();
    exemplar.release().unwrap();

    for (i, age) in [0i32, -1, -2].iter().enumerate() {
        delay
            .reference(*age)
            .unwrap()
            .into_scalar()
            .unwrap()
            .set(ScalarValue::I32(i as i32 + 1))
            .unwrap();
    }

    delay.age().unwrap();
    // ages advance by one along the ring; the slot that was age 0
    // wrapped around to the oldest position
    let newest = delay.reference(0).unwrap().into_scalar().unwrap();
    assert_eq!(newest.get().unwrap(), ScalarValue::I32(2));
    let oldest = delay.reference(-2).unwrap().into_scalar().unwrap();
    assert_eq!(oldest.get().unwrap(), ScalarValue::I32(1));
}

#[test]
fn node_binding_keeps_the_delay_alive() {
    let ctx = Context::new().unwrap();
    let baseline = ctx.live_references();
    let exemplar = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    let delay = ctx.create_delay(&exemplar, 2).unwrap();
    exemplar.release().unwrap();

    let slot = delay.reference(0).unwrap().into_image().unwrap();
    fill(&slot, 5);

    let graph = ctx.create_graph().unwrap();
    let out = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    kernels::copy_node(&graph, &slot, &out).unwrap();

    // The app handle goes away; the node binding still pins the ring.
    delay.release().unwrap();
    graph.process().unwrap();
    assert_eq!(pixel(&out, 0, 0), 5);

    // Dropping the graph releases the binding, which takes the whole
    // ring with it.
    graph.release().unwrap();
    out.release().unwrap();
    assert_eq!(ctx.live_references(), baseline);
}

#[test]
fn pyramid_levels_feed_graph_nodes() {
    let ctx = Context::new().unwrap();
    let pyramid = ctx.create_pyramid(3, 0.5, 16, 16, ImageFormat::U8).unwrap();
    assert_eq!(pyramid.level_count().unwrap(), 3);

    let level1 = pyramid.level(1).unwrap();
    assert_eq!(level1.width().unwrap(), 8);
    fill(&level1, 33);

    let graph = ctx.create_graph().unwrap();
    let out = ctx.create_image(8, 8, ImageFormat::U8).unwrap();
    kernels::copy_node(&graph, &level1, &out).unwrap();
    graph.process().unwrap();
    assert_eq!(pixel(&out, 0, 0), 33);

    // the held level survives its parent pyramid
    pyramid.release().unwrap();
    assert_eq!(level1.width().unwrap(), 8);
    level1.release().unwrap();
}

#[test]
fn stale_handles_fail_after_release() {
    let ctx = Context::new().unwrap();
    let img = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    let copy = img.clone();
    copy.release().unwrap();
    assert!(matches!(img.width(), Err(VxError::InvalidReference(_))));
}

#[test]
fn retain_adds_an_external_hold() {
    let ctx = Context::new().unwrap();
    let img = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    img.retain().unwrap();
    assert_eq!(img.counts().unwrap(), (2, 0));

    let copy = img.clone();
    copy.release().unwrap();
    assert_eq!(img.counts().unwrap(), (1, 0));
    img.release().unwrap();
    assert_eq!(ctx.live_references(), 0);
}

#[test]
fn named_references_read_back() {
    let ctx = Context::new().unwrap();
    let img = ctx.create_image(4, 4, ImageFormat::U8).unwrap();
    img.set_name("camera.frame").unwrap();
    assert_eq!(img.name().unwrap().as_deref(), Some("camera.frame"));
}
