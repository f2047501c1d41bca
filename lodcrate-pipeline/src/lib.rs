//! Scene processors, mapping images, material casters and pipelines
//!
//! This crate turns the geometry stages of `lodcrate-simplification` into
//! scene-level operations:
//! - Processors for reduction, aggregation, remeshing, impostors and quad reduction
//! - Mapping images that link output texels to the source surfaces
//! - Material casters that bake colors, normals, displacement, ambient occlusion and more
//! - CPU ray queries for occlusion and camera visibility
//! - Pipelines that chain a processor with casters, inline or on a worker thread

pub mod casters;
pub mod mapping;
pub mod pipeline;
pub mod processors;
pub mod raycast;
pub mod visibility;

pub use casters::*;
pub use mapping::*;
pub use pipeline::*;
pub use processors::*;
pub use raycast::{Ray, RayHit, RayIndex};
pub use visibility::*;
