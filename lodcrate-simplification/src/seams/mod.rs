//! Modular seams
//!
//! Modular assets are meshes designed to be placed next to each other, so
//! their open borders must line up after each one is reduced on its own.
//! The [`ModularSeamAnalyzer`] finds the border polylines shared between
//! assets and records, for each of them, a decimation order. Replaying that
//! order while reducing any single asset reduces the shared borders
//! identically everywhere.

mod analyzer;
mod format;
mod replay;

pub use analyzer::ModularSeamAnalyzer;
pub use replay::{reduce_with_modular_seams, ModularSeamSettings};

use lodcrate_core::{Error, GeometryData, Point3f, Result};
use serde::{Deserialize, Serialize};

/// One recorded step of a seam decimation trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeamCollapse {
    /// Seam vertex folded away
    pub removed: u32,
    /// Neighbouring seam vertex it is folded into
    pub kept: u32,
    /// Largest deviation of the seam polyline once this collapse and all
    /// earlier ones are applied
    pub max_deviation: f64,
}

/// A border polyline shared by two or more geometries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModularSeam {
    /// Canonical vertex positions; relative to each geometry's bounding box
    /// minimum when the seams are translation independent
    pub vertices: Vec<[f32; 3]>,
    pub edges: Vec<[u32; 2]>,
    /// Geometries the seam was found in, sorted
    pub geometry_names: Vec<String>,
    /// `false` when the seam topology did not match across geometries; such
    /// seams are never reduced
    pub consistent: bool,
    pub collapses: Vec<SeamCollapse>,
}

impl ModularSeam {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of leading collapses to replay for the given targets. Both
    /// targets are always enabled and combine by `stop_condition`.
    pub(crate) fn collapse_prefix(
        &self,
        reduction_ratio: f32,
        max_deviation: f64,
        stop_condition: crate::StopCondition,
    ) -> usize {
        if !self.consistent {
            return 0;
        }
        let n = self.vertices.len();
        let keep = (reduction_ratio.clamp(0.0, 1.0) * n as f32).ceil() as usize;
        let by_ratio = n.saturating_sub(keep).min(self.collapses.len());
        let by_deviation = self
            .collapses
            .iter()
            .take_while(|c| c.max_deviation <= max_deviation)
            .count();
        match stop_condition {
            crate::StopCondition::All => by_ratio.max(by_deviation),
            crate::StopCondition::Any => by_ratio.min(by_deviation),
        }
    }
}

/// The result of a modular seam analysis
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModularSeams {
    /// Distance below which two border vertices are the same vertex
    pub tolerance: f32,
    pub is_translation_independent: bool,
    pub seams: Vec<ModularSeam>,
}

impl ModularSeams {
    pub fn modular_seam_count(&self) -> usize {
        self.seams.len()
    }

    fn seam(&self, index: usize) -> Result<&ModularSeam> {
        self.seams.get(index).ok_or_else(|| {
            Error::NotFound(format!(
                "modular seam {} (there are {})",
                index,
                self.seams.len()
            ))
        })
    }

    /// Names of the geometries sharing seam `index`
    pub fn modular_seam_geometry_names(&self, index: usize) -> Result<&[String]> {
        Ok(&self.seam(index)?.geometry_names)
    }

    /// Seam `index` as a geometry for inspection. Every seam edge becomes a
    /// degenerate triangle, so exporters write the polyline as faces.
    pub fn new_debug_modular_seam_geometry(&self, index: usize) -> Result<GeometryData> {
        let seam = self.seam(index)?;
        let coords = seam
            .vertices
            .iter()
            .map(|&[x, y, z]| Point3f::new(x, y, z))
            .collect();
        let triangles = seam
            .edges
            .iter()
            .map(|&[a, b]| [a as usize, b as usize, b as usize])
            .collect();
        Ok(GeometryData::from_coords_and_triangles(
            format!("modular_seam_{}", index),
            coords,
            triangles,
        ))
    }
}
