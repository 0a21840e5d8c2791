//! Hit detection for straight particle trajectories crossing layers of flat sensor tiles.
//!
//! Each detector layer is a triangle mesh. Sensor faces are picked out of the meshes
//! ([`tile::TilePolicy`]), every trajectory is projected onto each layer's plane, and the
//! projected point is tested against the layer's tiles in a tile-local frame ([`frame`]).
//! Every ray yields one [`record::HitRecord`], handed to a [`record::HitSink`].

pub mod config;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod ray;
pub mod record;
pub mod tile;

// re-export deps for convenience
pub use nalgebra;
pub use serde_json;

use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;

use config::{Settings, SimulationConfig};
use error::{Degeneracy, Error, LoadError, SinkError};
use frame::HelperAxis;
use nalgebra::Vector3;
use ray::Ray;
use record::{HitRecord, HitSink, LayerHit, RunSummary};
use tile::Layer;

pub type Float = f64;

/// Loads the detector in `dir` and keeps the sensor tiles of each layer.
pub fn load_layers(dir: &Path, settings: &Settings) -> Result<Vec<Layer>, LoadError> {
    let layers: Vec<Layer> = mesh::load_mesh_dir(dir, settings.scale)?
        .iter()
        .map(|mesh| Layer::from_mesh(mesh, &settings.policy, &HelperAxis))
        .collect();

    info!(
        "{} tiles in {} layers",
        layers.iter().map(|l| l.tiles.len()).sum::<usize>(),
        layers.len()
    );
    Ok(layers)
}

/// A detector and the rays to send through it.
///
/// Layers are never modified once built, so rays are traced independently and in parallel.
#[derive(Clone, Debug, PartialEq)]
pub struct Simulation {
    pub layers: Vec<Layer>,
    pub rays: Vec<Ray>,
    pub settings: Settings,
}

impl Simulation {
    pub fn new(layers: Vec<Layer>, rays: Vec<Ray>, settings: Settings) -> Self {
        Self {
            layers,
            rays,
            settings,
        }
    }

    /// Validates `config`, then loads the mesh and the trajectories, in that order.
    pub fn load(config: &SimulationConfig) -> Result<Self, Error> {
        config.validate()?;
        let layers = load_layers(&config.mesh_dir, &config.settings)?;
        let rays = ray::load_rays(&config.trajectory_path)?;
        Ok(Self::new(layers, rays, config.settings.clone()))
    }

    /// Follows `ray` through every layer.
    pub fn trace(&self, ray: &Ray) -> HitRecord {
        let mut record = HitRecord::new(ray, self.layers.len());

        // can't reach any layer
        if ray.momentum.z == 0.0 {
            for _ in &self.layers {
                record.push_layer(LayerHit::Degenerate {
                    reason: Degeneracy::ParallelMomentum,
                });
            }
            return record;
        }

        for (i, layer) in self.layers.iter().enumerate() {
            let hit = match layer.z_reference().map(|z| ray.project_to_plane(z)) {
                // no tiles, nothing to hit
                None => LayerHit::Miss,
                Some(Err(reason)) => LayerHit::Degenerate { reason },
                Some(Ok(point)) => {
                    if i == 0 {
                        record.entry = Some(point);
                    }
                    self.scan_layer(layer, &point)
                }
            };
            record.push_layer(hit);
        }

        record
    }

    /// Tests `point` against every tile of `layer`. If several tiles match, the last one wins.
    fn scan_layer(&self, layer: &Layer, point: &Vector3<Float>) -> LayerHit {
        let proximity = self.settings.proximity_tolerance;
        let mut hit = LayerHit::Miss;
        let mut matches = 0;

        for (j, tile) in layer.tiles.iter().enumerate() {
            if tile.is_hit(point, proximity) {
                hit = LayerHit::Hit {
                    tile: j,
                    position: *point,
                };
                matches += 1;
            }
        }

        if matches > 1 {
            debug!(
                "{matches} overlapping tiles in layer {} at {:?}",
                layer.index,
                point.as_slice()
            );
        }
        hit
    }

    /// Traces every ray and hands the records to `sink`, in trajectory order.
    ///
    /// Rays are traced in parallel, `settings.chunk_size` at a time. The settings are
    /// checked first, whether or not the simulation came from [`Simulation::load`].
    pub fn run(&self, mut sink: impl HitSink) -> Result<RunSummary, Error> {
        self.settings.validate()?;

        let pool = self
            .settings
            .threads
            .map(|n| rayon::ThreadPoolBuilder::new().num_threads(n).build())
            .transpose()?;

        info!(
            "tracing {} rays through {} layers",
            self.rays.len(),
            self.layers.len()
        );

        let mut summary = RunSummary::new(self.layers.len());
        for chunk in self.rays.chunks(self.settings.chunk_size) {
            let trace_chunk =
                || -> Vec<HitRecord> { chunk.par_iter().map(|ray| self.trace(ray)).collect() };

            let records = match &pool {
                Some(pool) => pool.install(trace_chunk),
                None => trace_chunk(),
            };

            summary = deliver(records, &mut sink, summary)?;
        }
        sink.finish()?;

        info!(
            "{} of {} rays hit at least one layer ({} degenerate)",
            summary.rays_with_hits, summary.rays, summary.degenerate_rays
        );
        for (layer, hits) in summary.layer_hits.iter().enumerate() {
            debug!("layer {layer}: {hits} hits");
        }

        Ok(summary)
    }
}

fn deliver(
    records: Vec<HitRecord>,
    sink: &mut impl HitSink,
    summary: RunSummary,
) -> Result<RunSummary, SinkError> {
    records.into_iter().try_fold(summary, |summary, record| {
        let summary = summary.add(&record);
        sink.accept(record)?;
        Ok(summary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh::{MeshLayer, Triangle};
    use tile::TilePolicy;

    fn v(x: Float, y: Float, z: Float) -> Vector3<Float> {
        Vector3::new(x, y, z)
    }

    /// The square `[-1, 1]^2` at height `z`, facing up, as a layer.
    fn square_layer(index: usize, z: Float) -> Layer {
        let mesh = MeshLayer {
            index,
            source: format!("layer{index}.stl").into(),
            scale: 1.0,
            triangles: vec![
                Triangle::new([v(-1., -1., z), v(1., -1., z), v(1., 1., z)]),
                Triangle::new([v(-1., -1., z), v(1., 1., z), v(-1., 1., z)]),
            ],
        };
        Layer::from_mesh(&mesh, &TilePolicy::Flat, &HelperAxis)
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

    fn simulation(layers: Vec<Layer>, rays: Vec<Ray>) -> Simulation {
        Simulation::new(layers, rays, Settings::default())
    }

    #[test]
    fn straight_down_through_square() {
        let sim = simulation(vec![square_layer(0, 0.)], vec![]);

        let record = sim.trace(&ray([0.25, -0.5, 10.], [0., 0., -1.]));

        assert_eq!(record.hits, 1);
        assert_eq!(
            record.layers,
            [LayerHit::Hit {
                tile: 0,
                position: v(0.25, -0.5, 0.)
            }]
        );
        assert_eq!(record.entry, Some(v(0.25, -0.5, 0.)));

        let record = sim.trace(&ray([5., 5., 10.], [0., 0., -1.]));
        assert_eq!(record.hits, 0);
        assert_eq!(record.layers, [LayerHit::Miss]);
        // the entry point is kept for misses too
        assert_eq!(record.entry, Some(v(5., 5., 0.)));
    }

    #[test]
    fn slanted_ray_crosses_stack() {
        let layers = (0..3).map(|i| square_layer(i, i as Float)).collect();
        let sim = simulation(layers, vec![]);

        let record = sim.trace(&ray([-0.9, 0.5, 0.], [0.5, 0., 1.]));

        assert_eq!(record.hits, 3);
        for (hit, expected) in record.layers.iter().zip([-0.9, -0.4, 0.1]) {
            let position = hit.position().unwrap();
            assert!((position.x - expected).abs() < 1e-12);
            assert_eq!(position.y, 0.5);
        }
        assert!(record.layers.iter().all(|h| matches!(h, LayerHit::Hit { tile: 1, .. })));
    }

    #[test]
    fn parallel_momentum_is_degenerate_everywhere() {
        let empty = Layer {
            tiles: vec![],
            ..square_layer(2, 2.)
        };
        let sim = simulation(vec![square_layer(0, 0.), square_layer(1, 1.), empty], vec![]);

        let record = sim.trace(&ray([0., 0., 0.], [1., 0., 0.]));

        assert_eq!(record.hits, 0);
        assert_eq!(record.entry, None);
        assert_eq!(record.layers.len(), 3);
        assert!(record.layers.iter().all(|h| *h
            == LayerHit::Degenerate {
                reason: Degeneracy::ParallelMomentum
            }));
    }

    #[test]
    fn empty_layer_is_a_miss() {
        let empty = Layer {
            tiles: vec![],
            ..square_layer(1, 1.)
        };
        let sim = simulation(vec![square_layer(0, 0.), empty], vec![]);

        let record = sim.trace(&ray([0.5, -0.5, -1.], [0., 0., 1.]));

        assert_eq!(record.hits, 1);
        assert_eq!(record.layers[1], LayerHit::Miss);
    }

    #[test]
    fn last_matching_tile_wins() {
        let mut layer = square_layer(0, 0.);
        let first = layer.tiles[0];
        layer.tiles.push(first);
        let sim = simulation(vec![layer], vec![]);

        let record = sim.trace(&ray([0.5, -0.5, 1.], [0., 0., -1.]));

        assert_eq!(record.hits, 1);
        assert!(matches!(record.layers[0], LayerHit::Hit { tile: 2, .. }));
    }

    #[test]
    fn run_keeps_trajectory_order() {
        let rays: Vec<_> = (0..100)
            .map(|i| {
                let x = (i as Float - 50.) / 20.;
                Ray {
                    id: i as Float,
                    ..ray([x, 0.33, 5.], [0., 0., -1.])
                }
            })
            .collect();
        let sim = Simulation::new(
            vec![square_layer(0, 0.), square_layer(1, -1.)],
            rays,
            Settings {
                chunk_size: 7,
                threads: Some(3),
                ..Settings::default()
            },
        );

        let mut records = Vec::new();
        let summary = sim.run(&mut records).unwrap();

        assert_eq!(records.len(), 100);
        assert!(records.iter().enumerate().all(|(i, r)| r.id == i as Float));
        assert!(records.iter().all(|r| r.layers.len() == 2));
        assert_eq!(summary.rays, 100);
        // -1 <= x <= 1
        assert_eq!(summary.rays_with_hits, 41);
        assert_eq!(summary.layer_hits, [41, 41]);
        assert_eq!(summary.degenerate_rays, 0);
    }

    #[test]
    fn run_checks_settings() {
        let rays = vec![ray([0., 0., 1.], [0., 0., -1.])];
        let invalid = [
            Settings {
                chunk_size: 0,
                ..Settings::default()
            },
            Settings {
                threads: Some(0),
                ..Settings::default()
            },
        ];

        for settings in invalid {
            let sim = Simulation::new(vec![square_layer(0, 0.)], rays.clone(), settings);
            let mut records = Vec::new();

            assert!(matches!(sim.run(&mut records), Err(Error::Configuration(_))));
            assert!(records.is_empty());
        }
    }
}
