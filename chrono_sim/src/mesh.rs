//! Loading of the per-layer triangle meshes.
//!
//! A detector is described by a directory holding one STL file (ASCII or binary) per layer.
//! Files are taken in file-name order and the position in that order becomes the layer index.

use std::{
    fs::{self, File},
    io::{BufReader, Read, Seek},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use nalgebra::Vector3;

use crate::{error::LoadError, Float};

/// A raw mesh facet, in mesh-file units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub vertices: [Vector3<Float>; 3],
    /// `(v1 - v0) x (v2 - v0)`, not normalized: its norm is twice the facet's area.
    ///
    /// The normal written in the STL record is ignored, exporters disagree on
    /// whether (and how) to fill it in.
    pub normal: Vector3<Float>,
}

impl Triangle {
    pub fn new(vertices: [Vector3<Float>; 3]) -> Self {
        let [v0, v1, v2] = vertices;
        Self {
            vertices,
            normal: (v1 - v0).cross(&(v2 - v0)),
        }
    }

    pub fn area(&self) -> Float {
        0.5 * self.normal.norm()
    }

    /// Distance of the first vertex to the z axis.
    pub fn radius(&self) -> Float {
        self.vertices[0].xy().norm()
    }

    pub fn scaled_vertices(&self, scale: Float) -> [Vector3<Float>; 3] {
        self.vertices.map(|v| v * scale)
    }
}

/// The unfiltered content of one layer's mesh file.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshLayer {
    /// Position of the file in the sorted directory listing
    pub index: usize,
    pub source: PathBuf,
    /// Factor applied to vertex coordinates when building tiles (e.g. 0.001 for mm -> m)
    pub scale: Float,
    /// In file order
    pub triangles: Vec<Triangle>,
}

/// Lists the mesh files of `dir`, sorted by file name.
pub fn mesh_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if !dir.is_dir() {
        return Err(LoadError::MissingDirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| LoadError::io(dir, e))? {
        let path = entry.map_err(|e| LoadError::io(dir, e))?.path();
        if path.is_file() {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(LoadError::EmptyDirectory(dir.to_path_buf()));
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Loads every layer of the detector found in `dir`.
pub fn load_mesh_dir(dir: &Path, scale: Float) -> Result<Vec<MeshLayer>, LoadError> {
    let layers = mesh_files(dir)?
        .into_iter()
        .enumerate()
        .map(|(index, source)| {
            let triangles = read_stl(&source)?;
            debug!(
                "layer {index} <- {} ({} triangles)",
                source.display(),
                triangles.len()
            );
            if triangles.is_empty() {
                warn!("mesh {} has no triangles", source.display());
            }
            Ok(MeshLayer {
                index,
                source,
                scale,
                triangles,
            })
        })
        .collect::<Result<Vec<_>, LoadError>>()?;

    info!("loaded {} layers from {}", layers.len(), dir.display());
    Ok(layers)
}

pub fn read_stl(path: &Path) -> Result<Vec<Triangle>, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    parse_stl(&mut BufReader::new(file), path)
}

/// Parses an ASCII or binary STL stream. `path` is only used in error messages.
pub fn parse_stl<R: Read + Seek>(reader: &mut R, path: &Path) -> Result<Vec<Triangle>, LoadError> {
    let facets =
        stl_io::create_stl_reader(reader).map_err(|e| LoadError::malformed(path, e.to_string()))?;

    facets
        .enumerate()
        .map(|(i, facet)| {
            let facet = facet
                .map_err(|e| LoadError::malformed(path, format!("facet {i}: {e}")))?;

            let vertices = facet
                .vertices
                .map(|v| Vector3::new(Float::from(v[0]), Float::from(v[1]), Float::from(v[2])));

            if vertices.iter().flat_map(|v| v.iter()).any(|c| !c.is_finite()) {
                return Err(LoadError::malformed(
                    path,
                    format!("facet {i} has a non-finite vertex"),
                ));
            }

            Ok(Triangle::new(vertices))
        })
        .collect()
}
