use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono_sim::{
    config::{SimulationConfig, DEFAULT_PROXIMITY_TOLERANCE},
    error::ConfigurationError,
    load_layers,
    record::JsonLinesSink,
    tile::{TilePolicy, DEFAULT_AREA_CUT, DEFAULT_RADIUS_CUT},
    Float, Simulation,
};
use clap::{Parser, ValueEnum};
use log::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PolicyKind {
    /// Facets facing up
    Flat,
    /// Outward facets at a fixed distance from the beam axis
    Disk,
}

/// Sends straight particle trajectories through a stack of sensor meshes and writes one
/// JSON line of hits per trajectory.
#[derive(Debug, Parser)]
#[command(name = "run_chrono_sim")]
struct Cli {
    /// Directory holding one STL file per detector layer, in file-name order
    #[arg(required_unless_present = "config")]
    mesh_dir: Option<PathBuf>,

    /// Trajectory file: id mass charge pt eta phi x y z px py pz, one ray per line
    #[arg(required_unless_present = "config")]
    rays: Option<PathBuf>,

    /// Output file, stdout if absent
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON run description; other flags override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,

    /// Factor applied to mesh coordinates
    #[arg(long)]
    scale: Option<Float>,

    /// Disk policy: distance of sensor faces to the beam axis, in mesh units
    #[arg(long)]
    radius_cut: Option<Float>,

    /// Disk policy: minimum facet area, in mesh units
    #[arg(long)]
    area_cut: Option<Float>,

    /// Skip tiles whose centroid is farther than this along x or y (0.1 if no value given)
    #[arg(long, value_name = "TOLERANCE")]
    proximity_tolerance: Option<Option<Float>>,

    /// Worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Rays traced between two writes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Only load the mesh and report the tiles of each layer
    #[arg(long)]
    inspect: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// The run described by the config file (if any), overridden by the command line.
    fn simulation_config(&self) -> anyhow::Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::from_json_file(path)?,
            None => SimulationConfig::new(PathBuf::new(), PathBuf::new()),
        };

        if let Some(dir) = &self.mesh_dir {
            config.mesh_dir = dir.clone();
        }
        if let Some(rays) = &self.rays {
            config.trajectory_path = rays.clone();
        }

        let settings = &mut config.settings;
        if let Some(scale) = self.scale {
            settings.scale = scale;
        }
        settings.policy = self.policy(settings.policy)?;
        if let Some(tolerance) = self.proximity_tolerance {
            settings.proximity_tolerance =
                Some(tolerance.unwrap_or(DEFAULT_PROXIMITY_TOLERANCE));
        }
        if let Some(threads) = self.threads {
            settings.threads = Some(threads);
        }
        if let Some(chunk_size) = self.chunk_size {
            settings.chunk_size = chunk_size;
        }
        settings.verbose |= self.verbose;

        Ok(config)
    }

    fn policy(&self, base: TilePolicy) -> Result<TilePolicy, ConfigurationError> {
        let kind = self.policy.unwrap_or(match base {
            TilePolicy::Flat => PolicyKind::Flat,
            TilePolicy::Disk { .. } => PolicyKind::Disk,
        });

        match kind {
            PolicyKind::Flat => {
                if self.radius_cut.is_some() || self.area_cut.is_some() {
                    return Err(ConfigurationError::Contradictory(
                        "--radius-cut and --area-cut only apply to the disk policy".into(),
                    ));
                }
                Ok(TilePolicy::Flat)
            }
            PolicyKind::Disk => {
                let (radius_cut, area_cut) = match base {
                    TilePolicy::Disk {
                        radius_cut,
                        area_cut,
                    } => (radius_cut, area_cut),
                    TilePolicy::Flat => (DEFAULT_RADIUS_CUT, DEFAULT_AREA_CUT),
                };
                Ok(TilePolicy::Disk {
                    radius_cut: self.radius_cut.unwrap_or(radius_cut),
                    area_cut: self.area_cut.unwrap_or(area_cut),
                })
            }
        }
    }
}

fn inspect(config: &SimulationConfig, out: &mut impl Write) -> anyhow::Result<()> {
    config.validate()?;
    let layers = load_layers(&config.mesh_dir, &config.settings)
        .with_context(|| format!("failed to load {}", config.mesh_dir.display()))?;

    for layer in &layers {
        let z = match layer.z_reference() {
            Some(z) => format!("z = {z}"),
            None => "no plane".into(),
        };
        writeln!(
            out,
            "layer {} ({}): {} tiles, {} physical tiles, {z}",
            layer.index,
            layer.source.display(),
            layer.tiles.len(),
            layer.physical_tiles(),
        )?;
    }
    Ok(())
}

fn run(config: &SimulationConfig, output: Option<&Path>) -> anyhow::Result<()> {
    let sim = Simulation::load(config).context("failed to load the simulation")?;

    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("can't create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let summary = sim
        .run(JsonLinesSink::new(writer))
        .context("simulation aborted")?;

    for layer in 0..summary.layer_hits.len() {
        if let Some(efficiency) = summary.efficiency(layer) {
            debug!("layer {layer}: efficiency {efficiency:.4}");
        }
    }
    if let Some(path) = output {
        info!("{} records written to {}", summary.rays, path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.simulation_config()?;

    let default_filter = if config.settings.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.inspect {
        inspect(&config, &mut io::stdout().lock())
    } else {
        run(&config, cli.output.as_deref())
    }
}
