//! Importer and exporter entry points with format detection

use std::path::{Path, PathBuf};

use lodcrate_core::{Error, Reporter, Result, Scene};

use crate::glb::{GltfReader, GltfWriter};
use crate::obj::{ObjReader, ObjWriter};
use crate::{SceneReader, SceneWriter};

/// Scene file formats recognised by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneFormat {
    Obj,
    Fbx,
    Glb,
}

impl SceneFormat {
    /// Detect the format from a path's extension, case-insensitively
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.trim_start_matches('.').to_lowercase());
        match ext.as_deref() {
            Some("obj") => Ok(SceneFormat::Obj),
            Some("fbx") => Ok(SceneFormat::Fbx),
            Some("glb") | Some("gltf") => Ok(SceneFormat::Glb),
            _ => Err(Error::UnsupportedFormat(format!(
                "unrecognised scene file extension: {}",
                path.display()
            ))),
        }
    }

    fn unsupported(self) -> Error {
        Error::UnsupportedFormat(format!("{:?} scenes are recognised but not supported", self))
    }
}

/// Read a scene, detecting the format from the extension
pub fn read_scene<P: AsRef<Path>>(path: P, reporter: &Reporter) -> Result<Scene> {
    let path = path.as_ref();
    match SceneFormat::from_path(path)? {
        SceneFormat::Obj => ObjReader::read_scene(path, reporter),
        SceneFormat::Glb => GltfReader::read_scene(path, reporter),
        other => Err(other.unsupported()),
    }
}

/// Write a scene, detecting the format from the extension
pub fn write_scene<P: AsRef<Path>>(scene: &Scene, path: P) -> Result<()> {
    let path = path.as_ref();
    match SceneFormat::from_path(path)? {
        SceneFormat::Obj => ObjWriter::write_scene(scene, path),
        SceneFormat::Glb => GltfWriter::write_scene(scene, path),
        other => Err(other.unsupported()),
    }
}

/// Loads a scene from `import_file_path`
#[derive(Debug, Default)]
pub struct SceneImporter {
    pub import_file_path: PathBuf,
    reporter: Reporter,
    scene: Option<Scene>,
}

impl SceneImporter {
    pub fn new(reporter: Reporter) -> Self {
        Self {
            reporter,
            ..Self::default()
        }
    }

    pub fn set_import_file_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.import_file_path = path.into();
    }

    /// Import the file. Failures are recorded with the reporter and returned.
    pub fn run(&mut self) -> Result<()> {
        match read_scene(&self.import_file_path, &self.reporter) {
            Ok(scene) => {
                self.scene = Some(scene);
                Ok(())
            }
            Err(e) => {
                self.reporter.error(
                    "SceneImporter",
                    "run",
                    e.kind(),
                    format!("failed to load {}: {}", self.import_file_path.display(), e),
                );
                Err(e)
            }
        }
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn take_scene(&mut self) -> Option<Scene> {
        self.scene.take()
    }
}

/// Writes a scene to `export_file_path`
#[derive(Debug, Default)]
pub struct SceneExporter {
    pub export_file_path: PathBuf,
    reporter: Reporter,
}

impl SceneExporter {
    pub fn new(reporter: Reporter) -> Self {
        Self {
            reporter,
            ..Self::default()
        }
    }

    pub fn set_export_file_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.export_file_path = path.into();
    }

    pub fn run(&self, scene: &Scene) -> Result<()> {
        write_scene(scene, &self.export_file_path).map_err(|e| {
            self.reporter.error(
                "SceneExporter",
                "run",
                e.kind(),
                format!("failed to save {}: {}", self.export_file_path.display(), e),
            );
            e
        })
    }
}
