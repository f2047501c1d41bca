//! Reduce the crates as seen by a camera above them. Faces the camera
//! cannot see are removed and the reducer spends its triangles on the
//! visible ones. The pallet only occludes and is left as it is.

use anyhow::Result;
use lodcrate_core::{CameraView, LogPolicy, NodeKind, SelectionSet, Transform3D, Vector3f};
use lodcrate_demos::{crates_scene, init_logging, output_dir, print_log};
use lodcrate_io::write_scene;
use lodcrate_pipeline::{Processor, ReductionProcessor};

fn main() -> Result<()> {
    init_logging();
    let mut scene = crates_scene()?;

    let root = scene.root();
    let camera = scene.create_child(
        root,
        "TopCamera",
        NodeKind::Camera(CameraView {
            direction: -Vector3f::y(),
            up: -Vector3f::z(),
            field_of_view: 100.0,
            orthographic: false,
        }),
    )?;
    if let Some(node) = scene.node_mut(camera) {
        node.relative_transform = Transform3D::translation(Vector3f::new(0.6, 4.0, 0.5));
    }
    let mut cameras = SelectionSet::new("Camera");
    cameras.add_item(camera);
    scene.selection_sets.add_selection_set(cameras);

    let mut occluders = SelectionSet::new("Occluder");
    if let Some(pallet) = scene.node_from_path("Root/Pallet") {
        occluders.add_item(pallet);
    }
    scene.selection_sets.add_selection_set(occluders);
    let before = scene.triangle_count();

    let mut processor = ReductionProcessor::new(scene);
    processor.reduction_settings.reduction_target_triangle_ratio = 0.5;
    let visibility = &mut processor.visibility_settings;
    visibility.camera_selection_set_name = Some("Camera".to_string());
    visibility.occluder_selection_set_name = Some("Occluder".to_string());
    visibility.cull_occluded_geometry = true;
    visibility.use_visibility_weights_in_reducer = true;
    visibility.visibility_weights_power = 2.0;
    println!("Start the reduction processor.");
    processor.run_processing()?;

    for (node, stats) in processor.stats() {
        println!(
            "node {}: {} -> {} triangles",
            node, stats.triangles_before, stats.triangles_after
        );
    }
    println!("Scene: {} -> {} triangles", before, processor.processed_scene().triangle_count());

    let path = output_dir()?.join("ReductionWithVisibility_Output.obj");
    write_scene(processor.processed_scene(), &path)?;
    print_log(processor.reporter(), LogPolicy::Report)
}
