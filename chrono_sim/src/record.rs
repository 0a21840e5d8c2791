//! Per-ray simulation output and the sinks consuming it.

use std::io::Write;

use nalgebra::Vector3;
use serde::Serialize;

use crate::{
    error::{Degeneracy, SinkError},
    ray::Ray,
    Float,
};

/// What happened to a ray in one layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LayerHit {
    /// `tile` is the index of the (last) matching tile within the layer.
    Hit {
        tile: usize,
        position: Vector3<Float>,
    },
    Miss,
    /// The ray couldn't be projected onto the layer. Counts as a miss.
    Degenerate { reason: Degeneracy },
}

impl LayerHit {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }

    pub fn position(&self) -> Option<&Vector3<Float>> {
        match self {
            Self::Hit { position, .. } => Some(position),
            _ => None,
        }
    }
}

/// The outcome of a ray's trip through the detector.
///
/// `layers` has one entry per detector layer, in layer order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HitRecord {
    pub id: Float,
    pub mass: Float,
    pub charge: Float,
    pub pt: Float,
    pub eta: Float,
    pub phi: Float,
    pub momentum: Vector3<Float>,
    /// Where the ray crosses the first layer's plane, hit or not. Efficiency studies
    /// use it as the denominator's position.
    pub entry: Option<Vector3<Float>>,
    /// Number of layers hit
    pub hits: usize,
    pub layers: Vec<LayerHit>,
}

impl HitRecord {
    /// An empty record carrying `ray`'s kinematics.
    pub fn new(ray: &Ray, num_layers: usize) -> Self {
        Self {
            id: ray.id,
            mass: ray.mass,
            charge: ray.charge,
            pt: ray.pt,
            eta: ray.eta,
            phi: ray.phi,
            momentum: ray.momentum,
            entry: None,
            hits: 0,
            layers: Vec::with_capacity(num_layers),
        }
    }

    pub fn push_layer(&mut self, hit: LayerHit) {
        if hit.is_hit() {
            self.hits += 1;
        }
        self.layers.push(hit);
    }

    pub fn is_degenerate(&self) -> bool {
        self.layers
            .iter()
            .any(|hit| matches!(hit, LayerHit::Degenerate { .. }))
    }
}

/// Where finalized records go. Records arrive in trajectory-file order.
pub trait HitSink {
    fn accept(&mut self, record: HitRecord) -> Result<(), SinkError>;

    /// Called once after the last record.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl HitSink for Vec<HitRecord> {
    fn accept(&mut self, record: HitRecord) -> Result<(), SinkError> {
        self.push(record);
        Ok(())
    }
}

impl<T: HitSink + ?Sized> HitSink for &mut T {
    fn accept(&mut self, record: HitRecord) -> Result<(), SinkError> {
        (**self).accept(record)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }
}

/// Writes each record as one line of JSON.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> HitSink for JsonLinesSink<W> {
    fn accept(&mut self, record: HitRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Run-wide counters, folded over the records of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub rays: usize,
    /// Rays hitting at least one layer
    pub rays_with_hits: usize,
    /// Rays that couldn't be projected onto at least one layer
    pub degenerate_rays: usize,
    /// Number of rays hitting each layer
    pub layer_hits: Vec<usize>,
}

impl RunSummary {
    pub fn new(num_layers: usize) -> Self {
        Self {
            layer_hits: vec![0; num_layers],
            ..Self::default()
        }
    }

    pub fn add(mut self, record: &HitRecord) -> Self {
        self.rays += 1;
        if record.hits > 0 {
            self.rays_with_hits += 1;
        }
        if record.is_degenerate() {
            self.degenerate_rays += 1;
        }
        for (count, hit) in self.layer_hits.iter_mut().zip(&record.layers) {
            if hit.is_hit() {
                *count += 1;
            }
        }
        self
    }

    /// Fraction of rays hitting `layer`, `None` before any ray.
    pub fn efficiency(&self, layer: usize) -> Option<Float> {
        let hits = *self.layer_hits.get(layer)?;
        (self.rays > 0).then(|| hits as Float / self.rays as Float)
    }
}
