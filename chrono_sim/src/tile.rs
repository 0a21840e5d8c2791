//! Sensor tiles: selection out of the raw meshes and the per-tile hit test.

use std::path::PathBuf;

use log::{debug, warn};
use nalgebra::{Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigurationError,
    frame::{FlatTriangle, FrameConvention},
    mesh::{MeshLayer, Triangle},
    Float,
};

pub const DEFAULT_RADIUS_CUT: Float = 1168.0;
pub const DEFAULT_AREA_CUT: Float = 400_000.0;

/// How sensor faces are told apart from the rest of a layer's mesh (support structure,
/// tile edges, bevels...), using only the facets' normals and positions.
///
/// Thresholds are in mesh-file units. In JSON, `{"type": "flat"}` or
/// `{"type": "disk", "radius_cut": 1168, "area_cut": 400000}` with both thresholds optional.
/// Unknown fields, and thresholds given to the flat policy, are rejected.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", try_from = "PolicyFields")]
pub enum TilePolicy {
    /// Tiles arranged around the beam axis, facing outwards: the normal has no z component,
    /// the facet sits at `radius_cut` from the axis (compared after truncation to an integer)
    /// and is larger than `area_cut`.
    Disk { radius_cut: Float, area_cut: Float },
    /// Tiles facing up: the normal has a positive z component.
    Flat,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum PolicyKind {
    Disk,
    Flat,
}

/// The JSON layout of a [`TilePolicy`], before the fields are checked against the type.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFields {
    #[serde(rename = "type")]
    kind: PolicyKind,
    radius_cut: Option<Float>,
    area_cut: Option<Float>,
}

impl TryFrom<PolicyFields> for TilePolicy {
    type Error = ConfigurationError;

    fn try_from(fields: PolicyFields) -> Result<Self, Self::Error> {
        match fields.kind {
            PolicyKind::Disk => Ok(Self::Disk {
                radius_cut: fields.radius_cut.unwrap_or(DEFAULT_RADIUS_CUT),
                area_cut: fields.area_cut.unwrap_or(DEFAULT_AREA_CUT),
            }),
            PolicyKind::Flat if fields.radius_cut.is_some() || fields.area_cut.is_some() => {
                Err(ConfigurationError::Contradictory(
                    "radius_cut and area_cut only apply to the disk policy".into(),
                ))
            }
            PolicyKind::Flat => Ok(Self::Flat),
        }
    }
}

impl Default for TilePolicy {
    fn default() -> Self {
        Self::Flat
    }
}

impl TilePolicy {
    pub fn disk() -> Self {
        Self::Disk {
            radius_cut: DEFAULT_RADIUS_CUT,
            area_cut: DEFAULT_AREA_CUT,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match *self {
            Self::Disk {
                radius_cut,
                area_cut,
            } => {
                if !(radius_cut.is_finite() && radius_cut > 0.0) {
                    return Err(ConfigurationError::out_of_range(
                        "radius_cut",
                        "a positive number",
                        radius_cut,
                    ));
                }
                if !(area_cut.is_finite() && area_cut >= 0.0) {
                    return Err(ConfigurationError::out_of_range(
                        "area_cut",
                        "a non-negative number",
                        area_cut,
                    ));
                }
                Ok(())
            }
            Self::Flat => Ok(()),
        }
    }

    /// Whether `triangle` is a sensor face under this policy.
    pub fn accepts(&self, triangle: &Triangle) -> bool {
        let n = &triangle.normal;
        match *self {
            Self::Disk {
                radius_cut,
                area_cut,
            } => {
                n.z == 0.0
                    && triangle.radius().trunc() == radius_cut.trunc()
                    && triangle.area() > area_cut
            }
            Self::Flat => n.z > 0.0,
        }
    }
}

/// One triangle of a sensor face, in simulation units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tile {
    pub vertices: [Vector3<Float>; 3],
    pub normal: Unit<Vector3<Float>>,
    /// The triangle in its local frame, `None` if no frame could be built for `normal`.
    /// Such a tile is never hit.
    pub flat: Option<FlatTriangle>,
    centroid: Vector3<Float>,
}

impl Tile {
    /// Returns `None` if the triangle's normal can't be normalized.
    pub fn new(
        vertices: [Vector3<Float>; 3],
        normal: &Vector3<Float>,
        convention: &impl FrameConvention,
    ) -> Option<Self> {
        let normal = Unit::try_new(*normal, Float::EPSILON)?;
        Some(Self {
            vertices,
            normal,
            flat: convention
                .frame(&normal)
                .map(|frame| FlatTriangle::new(frame, &vertices)),
            centroid: vertices.iter().sum::<Vector3<Float>>() / 3.0,
        })
    }

    pub fn centroid(&self) -> &Vector3<Float> {
        &self.centroid
    }

    /// Whether `point` (assumed to lie on, or close to, the tile's plane) falls on this tile.
    ///
    /// Points whose xy projection points away from the tile's normal are rejected first:
    /// they sit on the far side of the detector. With `proximity` set, points farther than
    /// that from the centroid along x or y are rejected too; this is an approximation that
    /// misses genuine hits near the corners of tiles larger than the tolerance.
    pub fn is_hit(&self, point: &Vector3<Float>, proximity: Option<Float>) -> bool {
        let Some(flat) = &self.flat else {
            return false;
        };

        let n = self.normal.as_ref();
        if point.x * n.x + point.y * n.y < 0.0 {
            return false;
        }

        if let Some(tolerance) = proximity {
            let c = &self.centroid;
            if (point.x - c.x).abs() >= tolerance || (point.y - c.y).abs() >= tolerance {
                return false;
            }
        }

        flat.contains(point)
    }
}

/// The tiles of one detector layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub index: usize,
    pub source: PathBuf,
    /// In mesh-file order; consecutive pairs usually make up one physical tile
    pub tiles: Vec<Tile>,
}

impl Layer {
    /// Keeps the triangles of `mesh` accepted by `policy`, scaled to simulation units.
    pub fn from_mesh(
        mesh: &MeshLayer,
        policy: &TilePolicy,
        convention: &impl FrameConvention,
    ) -> Self {
        let mut tiles = Vec::new();
        let mut no_frame = 0;

        for triangle in mesh.triangles.iter().filter(|t| policy.accepts(t)) {
            let Some(tile) = Tile::new(
                triangle.scaled_vertices(mesh.scale),
                &triangle.normal,
                convention,
            ) else {
                continue;
            };
            if tile.flat.is_none() {
                no_frame += 1;
            }
            tiles.push(tile);
        }

        debug!(
            "layer {}: kept {} of {} triangles",
            mesh.index,
            tiles.len(),
            mesh.triangles.len()
        );
        if tiles.is_empty() {
            warn!(
                "layer {} ({}) has no sensor tiles",
                mesh.index,
                mesh.source.display()
            );
        }
        if no_frame > 0 {
            warn!(
                "layer {}: {no_frame} tiles have a degenerate normal and can't be hit",
                mesh.index
            );
        }

        Self {
            index: mesh.index,
            source: mesh.source.clone(),
            tiles,
        }
    }

    /// The plane rays are projected onto: the z of the first tile's first vertex.
    pub fn z_reference(&self) -> Option<Float> {
        self.tiles.first().map(|tile| tile.vertices[0].z)
    }

    /// Counts the physical tiles of the layer, i. e. the consecutive triangle pairs
    /// `(0, 1), (2, 3), ...` sharing a diagonal (exactly two vertices).
    pub fn physical_tiles(&self) -> usize {
        self.tiles
            .chunks_exact(2)
            .filter(|pair| {
                let [a, b] = pair else {
                    // chunks_exact(2)
                    unreachable!()
                };
                a.vertices
                    .iter()
                    .filter(|v| b.vertices.contains(v))
                    .count()
                    == 2
            })
            .count()
    }
}
