use anyhow::{Result, ensure};
use biocrowds_core::{CrowdConfig, WorldState};
use clap::{Parser, ValueEnum};
use rand::{SeedableRng, rngs::SmallRng};
use tracing::info;

mod scene;

#[derive(Parser, Debug)]
#[command(
    name = "biocrowds",
    about = "Headless marker-field crowd steering demo"
)]
struct Args {
    /// Agent formation to load.
    #[arg(long, value_enum, default_value_t = Scenario::Ranks)]
    scenario: Scenario,
    /// Number of frames to simulate.
    #[arg(long, default_value_t = 600)]
    frames: u64,
    /// Fixed timestep in seconds supplied to each frame.
    #[arg(long, default_value_t = 1.0 / 60.0)]
    timestep: f32,
    /// RNG seed for marker scatter and agent colors.
    #[arg(long, default_value_t = 0x5EED_CAFE)]
    seed: u64,
    /// Lattice spacing of the stratified marker scatter.
    #[arg(long, default_value_t = 0.75)]
    marker_spacing: f32,
    /// Frames between progress log lines; 0 logs only the final summary.
    #[arg(long, default_value_t = 60)]
    log_interval: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Two opposing ranks crossing the plane.
    Ranks,
    /// Antipodal pairs around a circle.
    Circle,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    ensure!(
        args.timestep.is_finite() && args.timestep > 0.0,
        "timestep must be positive"
    );
    ensure!(
        args.marker_spacing.is_finite() && args.marker_spacing > 0.0,
        "marker spacing must be positive"
    );

    let mut world = WorldState::new(CrowdConfig::default())?;
    let extent = world.config().plane_extent;

    let mut rng = SmallRng::seed_from_u64(args.seed);
    let markers = scene::scatter_markers(extent, args.marker_spacing, &mut rng);
    let agents = match args.scenario {
        Scenario::Ranks => scene::opposing_ranks(extent, &mut rng),
        Scenario::Circle => scene::circle_pairs(extent / 4.0, &mut rng),
    };
    info!(
        scenario = ?args.scenario,
        markers = markers.len(),
        agents = agents.len(),
        "Loading scene"
    );
    world.load_scene(markers, agents)?;

    for frame in 0..args.frames {
        let summary = world.step(args.timestep);
        if args.log_interval > 0 && frame.is_multiple_of(args.log_interval) {
            info!(
                tick = summary.tick.0,
                claimed = summary.claimed_markers,
                avg_speed = summary.average_speed,
                avg_goal_distance = summary.average_goal_distance,
                "Stepped frame",
            );
        }
    }

    if let Some(summary) = world.history().last() {
        info!(
            tick = summary.tick.0,
            agents = summary.agent_count,
            markers = summary.marker_count,
            claimed = summary.claimed_markers,
            avg_goal_distance = summary.average_goal_distance,
            "Simulation finished",
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
