//! Scene seeding: stratified marker scatter and agent formations.

use biocrowds_core::AgentSeed;
use glam::Vec2;
use rand::Rng;

/// Stratified marker scatter: one marker jittered inside each lattice cell.
///
/// Jitter stays within the cell, so every marker lands inside the plane.
pub fn scatter_markers(extent: f32, spacing: f32, rng: &mut impl Rng) -> Vec<Vec2> {
    let half = extent / 2.0;
    let mut markers = Vec::new();
    let mut x = -half;
    while x + spacing <= half {
        let mut z = -half;
        while z + spacing <= half {
            markers.push(Vec2::new(
                x + rng.random::<f32>() * spacing,
                z + rng.random::<f32>() * spacing,
            ));
            z += spacing;
        }
        x += spacing;
    }
    markers
}

/// Two ranks on opposite plane edges, every agent crossing to the far side.
pub fn opposing_ranks(extent: f32, rng: &mut impl Rng) -> Vec<AgentSeed> {
    let half = extent / 2.0;
    let mut agents = Vec::new();
    let mut lane = -half;
    while lane <= half {
        agents.push(AgentSeed {
            start: Vec2::new(lane, half),
            goal: Vec2::new(lane, -half),
            color: random_color(rng),
        });
        agents.push(AgentSeed {
            start: Vec2::new(lane, -half),
            goal: Vec2::new(lane, half),
            color: random_color(rng),
        });
        lane += 5.0;
    }
    agents
}

/// Antipodal agent pairs around a circle, each heading for the opposite point.
pub fn circle_pairs(radius: f32, rng: &mut impl Rng) -> Vec<AgentSeed> {
    let step = std::f32::consts::PI / 6.0;
    let mut agents = Vec::new();
    let mut theta = 0.0_f32;
    while theta < std::f32::consts::PI - step {
        let pos = Vec2::new(theta.cos(), theta.sin()) * radius;
        agents.push(AgentSeed {
            start: pos,
            goal: -pos,
            color: random_color(rng),
        });
        agents.push(AgentSeed {
            start: -pos,
            goal: pos,
            color: random_color(rng),
        });
        theta += step;
    }
    agents
}

fn random_color(rng: &mut impl Rng) -> [f32; 3] {
    [rng.random(), rng.random(), rng.random()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn scattered_markers_stay_inside_plane() {
        let mut rng = SmallRng::seed_from_u64(7);
        let extent = 40.0;
        let markers = scatter_markers(extent, 0.75, &mut rng);
        assert!(!markers.is_empty());
        for marker in markers {
            assert!(marker.x.abs() <= extent / 2.0);
            assert!(marker.y.abs() <= extent / 2.0);
        }
    }

    #[test]
    fn opposing_ranks_are_balanced() {
        let mut rng = SmallRng::seed_from_u64(7);
        let agents = opposing_ranks(40.0, &mut rng);
        assert!(!agents.is_empty());
        assert_eq!(agents.len() % 2, 0);
        for pair in agents.chunks(2) {
            assert_eq!(pair[0].start, pair[1].goal);
            assert_eq!(pair[0].goal, pair[1].start);
        }
    }

    #[test]
    fn circle_pairs_are_antipodal() {
        let mut rng = SmallRng::seed_from_u64(7);
        let agents = circle_pairs(10.0, &mut rng);
        assert!(!agents.is_empty());
        for agent in agents {
            assert_eq!(agent.goal, -agent.start);
            assert!((agent.start.length() - 10.0).abs() < 1e-4);
        }
    }
}
