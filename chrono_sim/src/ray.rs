//! Particle trajectories: parsing and straight-line propagation.
//!
//! A trajectory file holds one ray per line, as 12 whitespace-separated numbers
//! (`id mass charge pt eta phi x y z px py pz`). Blank or whitespace-only lines are skipped
//! and don't count as records, but still count for the line numbers in [`ParseError`]s. Any
//! other line without exactly 12 fields is an error.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::info;
use nalgebra::Vector3;

use crate::{
    error::{Degeneracy, LoadError, ParseError, ParseErrorKind},
    Float,
};

/// Number of whitespace-separated values on a trajectory line.
pub const RAY_FIELDS: usize = 12;

/// A simulated particle, propagated as a straight line from `position` along `momentum`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub id: Float,
    pub mass: Float,
    pub charge: Float,
    /// transverse momentum
    pub pt: Float,
    /// pseudorapidity
    pub eta: Float,
    /// azimuth
    pub phi: Float,
    pub position: Vector3<Float>,
    pub momentum: Vector3<Float>,
}

impl Ray {
    /// Builds a ray from the fields of one trajectory line, in file order.
    pub fn from_fields(f: [Float; RAY_FIELDS]) -> Self {
        Self {
            id: f[0],
            mass: f[1],
            charge: f[2],
            pt: f[3],
            eta: f[4],
            phi: f[5],
            position: Vector3::new(f[6], f[7], f[8]),
            momentum: Vector3::new(f[9], f[10], f[11]),
        }
    }

    /// Get the point at parameter `t` along the momentum (can be negative)
    pub fn at(&self, t: Float) -> Vector3<Float> {
        self.position + self.momentum * t
    }

    /// Where the ray's line crosses the plane `z = z_plane`.
    ///
    /// The line extends both ways: a plane behind the starting position is still crossed.
    pub fn project_to_plane(&self, z_plane: Float) -> Result<Vector3<Float>, Degeneracy> {
        if self.momentum.z == 0.0 {
            return Err(Degeneracy::ParallelMomentum);
        }

        let t = (z_plane - self.position.z) / self.momentum.z;
        let mut point = self.at(t);
        if !point.iter().all(|c| c.is_finite()) {
            return Err(Degeneracy::NonFiniteProjection);
        }

        // exact, whatever the rounding of `t`
        point.z = z_plane;
        Ok(point)
    }
}

pub fn load_rays(path: &Path) -> Result<Vec<Ray>, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let rays = parse_rays(BufReader::new(file), path)?;
    info!("loaded {} trajectories from {}", rays.len(), path.display());
    Ok(rays)
}

/// Parses one ray per non-blank line. `path` is only used in error messages.
pub fn parse_rays(reader: impl BufRead, path: &Path) -> Result<Vec<Ray>, LoadError> {
    let mut rays = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| LoadError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }

        let fields = parse_line(&line).map_err(|kind| ParseError {
            path: path.to_path_buf(),
            line: i + 1,
            kind,
        })?;
        rays.push(Ray::from_fields(fields));
    }

    Ok(rays)
}

fn parse_line(line: &str) -> Result<[Float; RAY_FIELDS], ParseErrorKind> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let tokens: [&str; RAY_FIELDS] = tokens
        .as_slice()
        .try_into()
        .map_err(|_| ParseErrorKind::FieldCount {
            found: tokens.len(),
        })?;

    let mut fields = [0.; RAY_FIELDS];
    for (field, token) in fields.iter_mut().zip(tokens) {
        *field = token
            .parse::<Float>()
            .map_err(|_| ParseErrorKind::InvalidNumber {
                token: token.into(),
            })?;

        if !field.is_finite() {
            return Err(ParseErrorKind::NonFinite {
                token: token.into(),
            });
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn parse(text: &str) -> Result<Vec<Ray>, LoadError> {
        parse_rays(text.as_bytes(), Path::new("rays.txt"))
    }

    fn ray(position: [Float; 3], momentum: [Float; 3]) -> Ray {
        Ray {
            id: 13.,
            mass: 0.105,
            charge: -1.,
            pt: 1.,
            eta: 0.,
            phi: 0.,
            position: position.into(),
            momentum: momentum.into(),
        }
    }

    #[test]
    fn parses_fields_in_order() {
        let rays = parse(
            "13 0.105 -1 2.5 1.2 0.3 0 0 0.01 1.5 2.0 3.25\n\
             \n\
             -211 0.139 1 1 -2 3.1 1e-3 2 3 4 5 -6\n",
        )
        .unwrap();

        assert_eq!(rays.len(), 2);
        let r = &rays[0];
        assert_eq!(
            [r.id, r.mass, r.charge, r.pt, r.eta, r.phi],
            [13., 0.105, -1., 2.5, 1.2, 0.3]
        );
        assert_eq!(r.position, Vector3::new(0., 0., 0.01));
        assert_eq!(r.momentum, Vector3::new(1.5, 2.0, 3.25));
        assert_eq!(rays[1].id, -211.);
        assert_eq!(rays[1].momentum.z, -6.);
    }

    #[test]
    fn wrong_field_count() {
        let err = parse("1 2 3 4 5 6 7 8 9 10 11 12\n1 2 3\n").unwrap_err();

        let LoadError::Parse(err) = err else {
            panic!("expected a parse error, got {err:?}");
        };
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, ParseErrorKind::FieldCount { found: 3 });
        assert_eq!(err.to_string(), "rays.txt:2: expected 12 fields, found 3");
    }

    #[test]
    fn blank_lines_are_skipped_but_counted() {
        let rays = parse("\n   \n1 2 3 4 5 6 7 8 9 10 11 12\n\t\n").unwrap();
        assert_eq!(rays.len(), 1);

        let err = parse("\n   \n1 2 3\n").unwrap_err();
        assert!(matches!(
            err,
            LoadError::Parse(ParseError {
                line: 3,
                kind: ParseErrorKind::FieldCount { found: 3 },
                ..
            })
        ));
    }

    #[test]
    fn non_numeric_token() {
        let err = parse("1 2 3 4 5 6 7 8 9 10 11 twelve").unwrap_err();

        assert!(matches!(
            err,
            LoadError::Parse(ParseError {
                line: 1,
                kind: ParseErrorKind::InvalidNumber { ref token },
                ..
            }) if token == "twelve"
        ));
    }

    #[test]
    fn non_finite_token() {
        let err = parse("1 2 3 4 5 6 7 8 9 10 inf 12").unwrap_err();

        assert!(matches!(
            err,
            LoadError::Parse(ParseError {
                kind: ParseErrorKind::NonFinite { .. },
                ..
            })
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            load_rays(Path::new("/nonexistent/rays.txt")),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn projection_downwards() {
        let point = ray([0., 0., 10.], [0., 0., -1.]).project_to_plane(0.).unwrap();
        assert_eq!(point, Vector3::zeros());
    }

    #[test]
    fn projection_along_slope() {
        let point = ray([1., 2., 0.], [2., -1., 4.]).project_to_plane(2.).unwrap();
        assert_eq!(point, Vector3::new(2., 1.5, 2.));
    }

    #[test]
    fn projection_lands_on_plane() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let mut momentum: [Float; 3] = rng.gen();
            momentum = momentum.map(|c| c - 0.5);
            if momentum[2] == 0.0 {
                continue;
            }
            let position = [(); 3].map(|_| rng.gen_range(-100.0..100.0));
            let z_plane = rng.gen_range(-1000.0..1000.0);

            let point = ray(position, momentum).project_to_plane(z_plane).unwrap();

            assert!((point.z - z_plane).abs() < 1e-9);
            // and on the ray's line
            let offset = point - Vector3::from(position);
            assert!(offset.cross(&Vector3::from(momentum)).norm() < 1e-6 * offset.norm().max(1.0));
        }
    }

    #[test]
    fn parallel_momentum_is_degenerate() {
        let r = ray([0., 0., 10.], [1., 1., 0.]);
        assert_eq!(r.project_to_plane(0.), Err(Degeneracy::ParallelMomentum));
    }

    #[test]
    fn overflowing_projection_is_degenerate() {
        let r = ray([0., 0., 0.], [1e300, 0., 1e-300]);
        assert_eq!(r.project_to_plane(1.), Err(Degeneracy::NonFiniteProjection));
    }
}
