//! # lodcrate
//!
//! Scene optimization for real-time 3D content: level-of-detail reduction,
//! aggregation, remeshing, impostors, material casting and modular seams.
//!
//! This is the umbrella crate that provides convenient access to all lodcrate
//! functionality. You can use this crate to get everything in one place, or
//! use individual crates for more granular control over dependencies.
//!
//! ## Features
//!
//! - **Core**: Scene graph, geometry data, materials, textures and reporting
//! - **I/O**: OBJ/MTL and glTF/GLB scenes, PNG textures
//! - **Simplification**: Edge collapse reduction with symmetry, quad reduction, remeshing, modular seams
//! - **Pipeline**: Processors, visibility culling, mapping images, material casters and pipelines
//!
//! ## Quick Start
//!
//! ```no_run
//! use lodcrate::prelude::*;
//!
//! # fn main() -> lodcrate::Result<()> {
//! let mut pipeline = ReductionPipeline::default();
//! pipeline.processor_mut().reduction_settings.reduction_target_triangle_ratio = 0.25;
//! pipeline.run_scene_from_file("input/crates.obj", Some("output/reduced.obj"), RunMode::InThisProcess)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Enables core, io, simplification and pipeline
//! - `io`: File format support
//! - `simplification`: Geometry reduction stages
//! - `pipeline`: Scene processors and material casting (pulls in `io` and `simplification`)
//! - `all`: Enables all features

// Re-export core functionality
pub use lodcrate_core::*;

// Re-export sub-crates
#[cfg(feature = "io")]
pub use lodcrate_io as io;

#[cfg(feature = "simplification")]
pub use lodcrate_simplification as simplification;

#[cfg(feature = "pipeline")]
pub use lodcrate_pipeline as pipeline;

/// Convenient imports for common use cases
pub mod prelude {
    pub use lodcrate_core::*;

    #[cfg(feature = "io")]
    pub use lodcrate_io::{read_scene, write_scene, SceneExporter, SceneImporter};

    #[cfg(feature = "simplification")]
    pub use lodcrate_simplification::*;

    #[cfg(feature = "pipeline")]
    pub use lodcrate_pipeline::*;
}
