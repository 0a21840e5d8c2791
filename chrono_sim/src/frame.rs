//! Tile-local coordinate frames and the point-in-triangle test built on them.

use core::array;

use nalgebra::{Matrix3, Unit, Vector3};

use crate::Float;

/// A rotation taking world coordinates into a frame whose third axis is a tile's normal.
///
/// Dropping the third coordinate of a rotated point projects it onto the tile's plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalFrame {
    /// rows are `e0`, `e1`, `e2 = normal`
    rotation: Matrix3<Float>,
}

impl LocalFrame {
    /// `e0`, `e1`, `e2` must be orthonormal and right-handed (`e0 x e1 = e2`).
    pub fn from_basis(e0: Vector3<Float>, e1: Vector3<Float>, e2: Vector3<Float>) -> Self {
        Self {
            rotation: Matrix3::from_rows(&[e0.transpose(), e1.transpose(), e2.transpose()]),
        }
    }

    pub fn rotation(&self) -> &Matrix3<Float> {
        &self.rotation
    }

    /// The 2D coordinates of `p`'s projection onto the tile plane.
    pub fn to_local(&self, p: &Vector3<Float>) -> [Float; 2] {
        let local = self.rotation * p;
        [local.x, local.y]
    }

    /// Same-side test, see [`FlatTriangle::contains`]. Tests against the same triangle
    /// should go through a [`FlatTriangle`] instead, which rotates the vertices once.
    pub fn contains(&self, vertices: &[Vector3<Float>; 3], point: &Vector3<Float>) -> bool {
        FlatTriangle::new(*self, vertices).contains(point)
    }
}

/// A triangle rotated into a local frame, with its vertices flattened onto the frame's plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlatTriangle {
    frame: LocalFrame,
    corners: [[Float; 2]; 3],
}

impl FlatTriangle {
    pub fn new(frame: LocalFrame, vertices: &[Vector3<Float>; 3]) -> Self {
        Self {
            corners: vertices.map(|v| frame.to_local(&v)),
            frame,
        }
    }

    pub fn frame(&self) -> &LocalFrame {
        &self.frame
    }

    pub fn corners(&self) -> &[[Float; 2]; 3] {
        &self.corners
    }

    /// `point` is inside iff, walking around the corners in order, the vectors from the
    /// point to consecutive corners never turn clockwise.
    ///
    /// Edges and vertices belong to the triangle, so the seam between the two halves of a
    /// tile isn't blind. A triangle wound clockwise w.r.t. the frame's normal, or with no
    /// area, contains nothing.
    pub fn contains(&self, point: &Vector3<Float>) -> bool {
        let [px, py] = self.frame.to_local(point);
        let d = self.corners.map(|[x, y]| [x - px, y - py]);

        let turns: [Float; 3] = array::from_fn(|i| {
            let [ax, ay] = d[i];
            let [bx, by] = d[(i + 1) % 3];
            ax * by - ay * bx
        });

        turns.iter().all(|&c| c >= 0.0) && turns.iter().any(|&c| c > 0.0)
    }
}

/// A way of choosing the in-plane axes of a tile's local frame.
///
/// Only the normal is fixed by the tile. The same-side verdict doesn't depend on how the
/// remaining axes are picked as long as the frame is right-handed, but rounding near edges
/// does, so a run must stick to one convention.
pub trait FrameConvention {
    /// Returns `None` if no frame can be built (zero or non-finite normal).
    fn frame(&self, normal: &Unit<Vector3<Float>>) -> Option<LocalFrame>;
}

/// Cross the normal with a helper axis: `z` for normals lying in the xy plane
/// (barrel-like tiles), `y` otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HelperAxis;

impl HelperAxis {
    pub fn helper(normal: &Vector3<Float>) -> Vector3<Float> {
        if normal.z == 0.0 {
            Vector3::z()
        } else {
            Vector3::y()
        }
    }
}

impl FrameConvention for HelperAxis {
    fn frame(&self, normal: &Unit<Vector3<Float>>) -> Option<LocalFrame> {
        let n = normal.as_ref();
        let e0 = Unit::try_new(Self::helper(n).cross(n), Float::EPSILON * 16.0)?;
        let e1 = n.cross(&e0);

        let frame = LocalFrame::from_basis(e0.into_inner(), e1, *n);
        frame.rotation.iter().all(|c| c.is_finite()).then_some(frame)
    }
}
