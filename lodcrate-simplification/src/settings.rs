//! Reduction settings shared by the reducer, the quad reducer and the
//! modular seam analyzer

use lodcrate_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::edge_collapse::{FeatureImportances, ReductionTargets};
use crate::symmetry::{SymmetryAxis, SymmetryConstraint, SymmetryPlane};

/// How several enabled reduction targets combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopCondition {
    /// Stop once every enabled target is reached
    All,
    /// Stop as soon as any enabled target is reached
    #[default]
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionSettings {
    /// Fraction of the input triangles to keep
    pub reduction_target_triangle_ratio: f32,
    pub reduction_target_triangle_count: usize,
    /// Largest allowed surface deviation, in scene units
    pub reduction_target_max_deviation: f32,
    /// Target diameter in pixels
    pub reduction_target_on_screen_size: u32,
    pub use_triangle_ratio: bool,
    pub use_triangle_count: bool,
    pub use_max_deviation: bool,
    pub use_on_screen_size: bool,
    pub stop_condition: StopCondition,

    pub geometry_importance: f32,
    pub material_importance: f32,
    pub texture_importance: f32,
    pub shading_importance: f32,
    pub vertex_color_importance: f32,

    /// Never move or remove vertices on open borders
    pub lock_geometric_border: bool,

    /// Collapse mirrored edge pairs together so a symmetric mesh stays symmetric
    pub keep_symmetry: bool,
    pub symmetry_axis: SymmetryAxis,
    /// Position of the symmetry plane along its axis
    pub symmetry_offset: f32,
    /// Vertex matching distance, relative to the mesh bounding box diagonal
    pub symmetry_detection_tolerance: f32,
    /// Find the plane per mesh instead of using the axis and offset
    pub use_automatic_symmetry_detection: bool,

    /// Only meshes in this selection set are reduced
    pub process_selection_set_name: Option<String>,
}

impl Default for ReductionSettings {
    fn default() -> Self {
        Self {
            reduction_target_triangle_ratio: 0.5,
            reduction_target_triangle_count: 0,
            reduction_target_max_deviation: 0.0,
            reduction_target_on_screen_size: 300,
            use_triangle_ratio: true,
            use_triangle_count: false,
            use_max_deviation: false,
            use_on_screen_size: false,
            stop_condition: StopCondition::Any,
            geometry_importance: 1.0,
            material_importance: 1.0,
            texture_importance: 1.0,
            shading_importance: 1.0,
            vertex_color_importance: 1.0,
            lock_geometric_border: false,
            keep_symmetry: false,
            symmetry_axis: SymmetryAxis::X,
            symmetry_offset: 0.0,
            symmetry_detection_tolerance: 0.0004,
            use_automatic_symmetry_detection: false,
            process_selection_set_name: None,
        }
    }
}

impl ReductionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose the stop condition and which targets are enabled
    pub fn set_reduction_targets(
        &mut self,
        stop_condition: StopCondition,
        use_triangle_ratio: bool,
        use_triangle_count: bool,
        use_max_deviation: bool,
        use_on_screen_size: bool,
    ) {
        self.stop_condition = stop_condition;
        self.use_triangle_ratio = use_triangle_ratio;
        self.use_triangle_count = use_triangle_count;
        self.use_max_deviation = use_max_deviation;
        self.use_on_screen_size = use_on_screen_size;
    }

    pub fn with_triangle_ratio(mut self, ratio: f32) -> Self {
        self.reduction_target_triangle_ratio = ratio;
        self
    }

    pub fn with_triangle_count(mut self, count: usize) -> Self {
        self.reduction_target_triangle_count = count;
        self
    }

    pub fn with_max_deviation(mut self, deviation: f32) -> Self {
        self.reduction_target_max_deviation = deviation;
        self
    }

    pub fn with_on_screen_size(mut self, pixels: u32) -> Self {
        self.reduction_target_on_screen_size = pixels;
        self
    }

    pub fn with_stop_condition(mut self, stop_condition: StopCondition) -> Self {
        self.stop_condition = stop_condition;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.use_triangle_ratio
            || self.use_triangle_count
            || self.use_max_deviation
            || self.use_on_screen_size)
        {
            return Err(Error::InvalidSettings("no reduction target is enabled".into()));
        }
        if !(0.0..=1.0).contains(&self.reduction_target_triangle_ratio) {
            return Err(Error::InvalidSettings(format!(
                "triangle ratio {} is outside [0, 1]",
                self.reduction_target_triangle_ratio
            )));
        }
        if self.use_max_deviation && !(self.reduction_target_max_deviation >= 0.0) {
            return Err(Error::InvalidSettings("max deviation must be non-negative".into()));
        }
        if self.use_on_screen_size && self.reduction_target_on_screen_size == 0 {
            return Err(Error::InvalidSettings("on-screen size must be positive".into()));
        }
        let importances = [
            self.geometry_importance,
            self.material_importance,
            self.texture_importance,
            self.shading_importance,
            self.vertex_color_importance,
        ];
        if importances.iter().any(|i| !(*i >= 0.0)) {
            return Err(Error::InvalidSettings("importances must be non-negative".into()));
        }
        if self.keep_symmetry
            && (!self.symmetry_offset.is_finite() || !(self.symmetry_detection_tolerance >= 0.0))
        {
            return Err(Error::InvalidSettings(
                "symmetry offset must be finite and detection tolerance non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Symmetry the reducer keeps, if enabled
    pub fn symmetry(&self) -> Option<SymmetryConstraint> {
        self.keep_symmetry.then(|| SymmetryConstraint {
            plane: (!self.use_automatic_symmetry_detection)
                .then(|| SymmetryPlane::new(self.symmetry_axis, self.symmetry_offset)),
            tolerance: self.symmetry_detection_tolerance,
        })
    }

    pub fn importances(&self) -> FeatureImportances {
        FeatureImportances {
            geometry: self.geometry_importance as f64,
            material: self.material_importance as f64,
            texture: self.texture_importance as f64,
            shading: self.shading_importance as f64,
            vertex_color: self.vertex_color_importance as f64,
        }
    }

    /// Concrete targets for a geometry with `triangle_count` triangles whose
    /// bounding sphere has diameter `diameter`
    pub fn targets(&self, triangle_count: usize, diameter: f64) -> ReductionTargets {
        let mut triangle_targets = Vec::new();
        if self.use_triangle_ratio {
            triangle_targets
                .push((self.reduction_target_triangle_ratio as f64 * triangle_count as f64).round() as usize);
        }
        if self.use_triangle_count {
            triangle_targets.push(self.reduction_target_triangle_count);
        }
        let mut deviation_targets = Vec::new();
        if self.use_max_deviation {
            deviation_targets.push(self.reduction_target_max_deviation as f64);
        }
        if self.use_on_screen_size {
            deviation_targets.push(on_screen_size_deviation(diameter, self.reduction_target_on_screen_size));
        }
        ReductionTargets::combine(self.stop_condition, &triangle_targets, &deviation_targets)
    }
}

/// Deviation at which one pixel of a `pixels` wide view is exceeded
pub fn on_screen_size_deviation(diameter: f64, pixels: u32) -> f64 {
    diameter / pixels.max(1) as f64
}
