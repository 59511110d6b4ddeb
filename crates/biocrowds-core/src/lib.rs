//! Core marker-field crowd steering simulation.
//!
//! A bounded square plane is scattered with stationary markers. Every frame
//! each marker is claimed by at most one nearby agent (nearest wins, below a
//! fixed distance threshold); each agent then blends displacement vectors
//! toward its claimed markers, weighted by proximity and alignment with its
//! goal direction, and advances along the blended direction at a capped
//! speed.

use biocrowds_index::{IndexError, MarkerGrid, MarkerIndex};
use glam::{Vec2, Vec3};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

/// Convenience alias for associating side data with agents.
pub type AgentMap<T> = SecondaryMap<AgentId, T>;

/// Body height of an agent; positions sit half this above the plane.
pub const AGENT_HEIGHT: f32 = 2.0;

/// Monotonic frame counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Tick(pub u64);

impl Tick {
    /// The tick before any frame has run.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// The following tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Errors that can occur when constructing world state or loading scenes.
#[derive(Debug, Error)]
pub enum WorldStateError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Indicates scene content the spatial index cannot hold.
    #[error("invalid scene: {0}")]
    InvalidScene(#[from] IndexError),
}

/// Static configuration for a crowd world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrowdConfig {
    /// Side length of the square ground plane, centered on the origin.
    pub plane_extent: f32,
    /// Neighborhood scan radius around an agent's cell, in grid cells.
    pub neighborhood_radius: u32,
    /// Maximum plane distance at which a marker can be claimed (exclusive).
    pub claim_threshold: f32,
    /// Cap applied to the magnitude of the blended steering direction.
    pub max_speed: f32,
    /// Speed along the goal direction when an agent owns no markers.
    pub cruise_speed: f32,
    /// Fixed scale combined with the frame's elapsed time at integration.
    pub speed_multiplier: f32,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            plane_extent: 40.0,
            neighborhood_radius: 6,
            claim_threshold: 4.0,
            max_speed: 8.0,
            cruise_speed: 1.0,
            speed_multiplier: 5.0,
            history_capacity: 256,
        }
    }
}

impl CrowdConfig {
    /// Validates the configuration.
    ///
    /// The neighborhood radius must cover the claim threshold: with
    /// ceiling-based cell mapping two plane points within distance `t` can
    /// land up to `floor(t) + 1` cells apart on an axis, and the half-open
    /// scan range reaches only `radius - 1` cells upward, so the smallest
    /// safe radius is `floor(t) + 2`.
    fn validate(&self) -> Result<(), WorldStateError> {
        if !self.plane_extent.is_finite() || self.plane_extent <= 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "plane_extent must be positive and finite",
            ));
        }
        if !self.claim_threshold.is_finite() || self.claim_threshold <= 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "claim_threshold must be positive and finite",
            ));
        }
        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "max_speed must be positive and finite",
            ));
        }
        if !self.cruise_speed.is_finite()
            || self.cruise_speed <= 0.0
            || self.cruise_speed > self.max_speed
        {
            return Err(WorldStateError::InvalidConfig(
                "cruise_speed must be positive and no greater than max_speed",
            ));
        }
        if !self.speed_multiplier.is_finite() || self.speed_multiplier <= 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "speed_multiplier must be positive and finite",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldStateError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        if (self.neighborhood_radius as f32) < self.claim_threshold.floor() + 2.0 {
            return Err(WorldStateError::InvalidConfig(
                "neighborhood_radius too small to cover claim_threshold",
            ));
        }
        Ok(())
    }
}

/// Initial placement for a spawned agent, in plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentSeed {
    /// Starting plane position.
    pub start: Vec2,
    /// Goal plane position the agent steers toward.
    pub goal: Vec2,
    /// Presentation color, one unit per channel.
    pub color: [f32; 3],
}

/// Scalar per-agent data stored in dense columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentData {
    /// Body position, lifted half the agent height above the plane.
    pub position: Vec3,
    /// Position projected onto the ground plane; all distance math uses it.
    pub plane_position: Vec2,
    /// Goal point in the plane.
    pub goal: Vec2,
    /// Unit vector toward the goal, refreshed after every move.
    pub goal_direction: Vec2,
    /// Steering output; magnitude never exceeds the configured max speed.
    pub direction: Vec2,
    /// Presentation color.
    pub color: [f32; 3],
}

/// Struct-of-arrays storage for agent scalar columns.
#[derive(Debug, Default, Clone)]
pub struct AgentColumns {
    positions: Vec<Vec3>,
    plane_positions: Vec<Vec2>,
    goals: Vec<Vec2>,
    goal_directions: Vec<Vec2>,
    directions: Vec<Vec2>,
    colors: Vec<[f32; 3]>,
}

impl AgentColumns {
    /// Create empty columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when no agents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Append one agent's scalars.
    pub fn push(&mut self, agent: AgentData) {
        self.positions.push(agent.position);
        self.plane_positions.push(agent.plane_position);
        self.goals.push(agent.goal);
        self.goal_directions.push(agent.goal_direction);
        self.directions.push(agent.direction);
        self.colors.push(agent.color);
        self.debug_assert_coherent();
    }

    /// Remove row `index` by swapping in the last row.
    pub fn swap_remove(&mut self, index: usize) -> AgentData {
        let removed = AgentData {
            position: self.positions.swap_remove(index),
            plane_position: self.plane_positions.swap_remove(index),
            goal: self.goals.swap_remove(index),
            goal_direction: self.goal_directions.swap_remove(index),
            direction: self.directions.swap_remove(index),
            color: self.colors.swap_remove(index),
        };
        self.debug_assert_coherent();
        removed
    }

    /// Produce a copy of row `index`.
    #[must_use]
    pub fn snapshot(&self, index: usize) -> AgentData {
        AgentData {
            position: self.positions[index],
            plane_position: self.plane_positions[index],
            goal: self.goals[index],
            goal_direction: self.goal_directions[index],
            direction: self.directions[index],
            color: self.colors[index],
        }
    }

    /// Clear all rows.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.plane_positions.clear();
        self.goals.clear();
        self.goal_directions.clear();
        self.directions.clear();
        self.colors.clear();
    }

    /// Immutable access to body positions.
    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Mutable access to body positions.
    #[must_use]
    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        &mut self.positions
    }

    /// Immutable access to plane projections.
    #[must_use]
    pub fn plane_positions(&self) -> &[Vec2] {
        &self.plane_positions
    }

    /// Mutable access to plane projections.
    #[must_use]
    pub fn plane_positions_mut(&mut self) -> &mut [Vec2] {
        &mut self.plane_positions
    }

    /// Immutable access to goal points.
    #[must_use]
    pub fn goals(&self) -> &[Vec2] {
        &self.goals
    }

    /// Immutable access to goal directions.
    #[must_use]
    pub fn goal_directions(&self) -> &[Vec2] {
        &self.goal_directions
    }

    /// Mutable access to goal directions.
    #[must_use]
    pub fn goal_directions_mut(&mut self) -> &mut [Vec2] {
        &mut self.goal_directions
    }

    /// Immutable access to steering directions.
    #[must_use]
    pub fn directions(&self) -> &[Vec2] {
        &self.directions
    }

    /// Mutable access to steering directions.
    #[must_use]
    pub fn directions_mut(&mut self) -> &mut [Vec2] {
        &mut self.directions
    }

    /// Immutable access to presentation colors.
    #[must_use]
    pub fn colors(&self) -> &[[f32; 3]] {
        &self.colors
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.positions.len(), self.plane_positions.len());
        debug_assert_eq!(self.positions.len(), self.goals.len());
        debug_assert_eq!(self.positions.len(), self.goal_directions.len());
        debug_assert_eq!(self.positions.len(), self.directions.len());
        debug_assert_eq!(self.positions.len(), self.colors.len());
    }
}

/// Dense SoA storage with generational handles for agent access.
#[derive(Debug, Default)]
pub struct AgentArena {
    slots: SlotMap<AgentId, usize>,
    handles: Vec<AgentId>,
    columns: AgentColumns,
}

impl AgentArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when no agents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate over active agent handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.handles.iter().copied()
    }

    /// Borrow the underlying column storage.
    #[must_use]
    pub fn columns(&self) -> &AgentColumns {
        &self.columns
    }

    /// Mutably borrow the underlying column storage.
    #[must_use]
    pub fn columns_mut(&mut self) -> &mut AgentColumns {
        &mut self.columns
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Returns true if `id` refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    /// Insert a new agent and return its handle.
    pub fn insert(&mut self, agent: AgentData) -> AgentId {
        let index = self.columns.len();
        self.columns.push(agent);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    /// Remove `id` returning its scalar data if it was present.
    pub fn remove(&mut self, id: AgentId) -> Option<AgentData> {
        let index = self.slots.remove(id)?;
        let removed = self.columns.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        Some(removed)
    }

    /// Produce a copy of the scalar data for `id`.
    #[must_use]
    pub fn snapshot(&self, id: AgentId) -> Option<AgentData> {
        let index = self.index_of(id)?;
        Some(self.columns.snapshot(index))
    }

    /// Clear all stored agents.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.handles.clear();
        self.columns.clear();
    }
}

/// Per-agent state that lives only for the duration of a frame.
#[derive(Debug, Clone, Default)]
pub struct AgentRuntime {
    /// Indices of the markers this agent owns this frame.
    pub owned_markers: Vec<u32>,
}

/// Combined snapshot of an agent's scalar columns and frame state.
#[derive(Debug, Clone)]
pub struct AgentState {
    /// The agent's handle.
    pub id: AgentId,
    /// Scalar column data.
    pub data: AgentData,
    /// Markers owned this frame.
    pub owned_markers: Vec<u32>,
}

/// A resolved claim: the owning agent and its distance to the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerClaim {
    /// Handle of the owning agent.
    pub agent: AgentId,
    /// Plane distance from the owner at claim time.
    pub distance: OrderedFloat<f32>,
}

/// Stationary marker positions plus the per-frame claim table.
#[derive(Debug, Default, Clone)]
pub struct MarkerSet {
    positions: Vec<Vec2>,
    claims: Vec<Option<MarkerClaim>>,
}

impl MarkerSet {
    /// Build a marker set from plane positions with an empty claim table.
    #[must_use]
    pub fn new(positions: Vec<Vec2>) -> Self {
        let claims = vec![None; positions.len()];
        Self { positions, claims }
    }

    /// Number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when the set holds no markers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// All marker plane positions.
    #[must_use]
    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    /// Plane position of one marker.
    #[must_use]
    pub fn position(&self, marker: u32) -> Vec2 {
        self.positions[marker as usize]
    }

    /// The current claim table, one entry per marker.
    #[must_use]
    pub fn claims(&self) -> &[Option<MarkerClaim>] {
        &self.claims
    }

    /// The agent currently owning `marker`, if any.
    #[must_use]
    pub fn owner(&self, marker: u32) -> Option<AgentId> {
        self.claims[marker as usize].map(|claim| claim.agent)
    }

    /// Reset the claim table for a new frame.
    pub fn clear_claims(&mut self) {
        for claim in &mut self.claims {
            *claim = None;
        }
    }

    /// Record `agent` as the marker's owner iff it is strictly nearer than
    /// the standing claim. Returns whether the table changed.
    ///
    /// Keeping the running-minimum distance alongside the owner makes the
    /// final owner independent of agent visit order, and re-visits by the
    /// current owner no-ops (`d < d` never holds).
    pub fn try_claim(&mut self, marker: u32, agent: AgentId, distance: OrderedFloat<f32>) -> bool {
        let slot = &mut self.claims[marker as usize];
        match slot {
            Some(existing) if existing.distance <= distance => false,
            _ => {
                *slot = Some(MarkerClaim { agent, distance });
                true
            }
        }
    }
}

/// Aggregate statistics for one completed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    /// Tick the summary describes.
    pub tick: Tick,
    /// Live agents at the end of the frame.
    pub agent_count: usize,
    /// Markers in the scene.
    pub marker_count: usize,
    /// Markers owned by some agent this frame.
    pub claimed_markers: usize,
    /// Mean steering-direction magnitude across agents.
    pub average_speed: f32,
    /// Mean plane distance from agents to their goals.
    pub average_goal_distance: f32,
}

/// Weighted blend of displacement vectors toward the owned markers.
///
/// Markers coinciding exactly with the agent's plane position have no
/// defined direction and contribute nothing. Returns `None` when nothing
/// contributes, leaving the fallback policy to the caller.
fn steer_direction(
    owned: &[u32],
    markers: &MarkerSet,
    plane_position: Vec2,
    goal_direction: Vec2,
    max_speed: f32,
) -> Option<Vec2> {
    if owned.is_empty() {
        return None;
    }
    let mut weighted = Vec2::ZERO;
    let mut total_weight = 0.0_f32;
    for &marker in owned {
        let displacement = markers.position(marker) - plane_position;
        let distance = displacement.length();
        let Some(unit) = displacement.try_normalize() else {
            continue;
        };
        let alignment = unit.dot(goal_direction);
        let weight = (1.0 + alignment) / (1.0 + distance);
        weighted += unit * weight;
        total_weight += weight;
    }
    (total_weight > 0.0).then(|| (weighted / total_weight).clamp_length_max(max_speed))
}

struct IntegrateResult {
    velocity: Vec2,
    goal_direction: Vec2,
}

/// Aggregate world state shared by the simulation and its host driver.
pub struct WorldState {
    config: CrowdConfig,
    tick: Tick,
    agents: AgentArena,
    runtime: AgentMap<AgentRuntime>,
    markers: MarkerSet,
    index: MarkerGrid,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("agent_count", &self.agents.len())
            .field("marker_count", &self.markers.len())
            .finish()
    }
}

impl WorldState {
    /// Instantiate an empty world using the supplied configuration.
    pub fn new(config: CrowdConfig) -> Result<Self, WorldStateError> {
        config.validate()?;
        let index = MarkerGrid::new(config.plane_extent)?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            agents: AgentArena::new(),
            runtime: AgentMap::new(),
            markers: MarkerSet::default(),
            index,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Replace the marker set and agent population, restarting time.
    ///
    /// Re-invocable: loading a scene over a running world resets it. Fails
    /// without touching marker or agent state when a marker lies outside
    /// the plane.
    pub fn load_scene(
        &mut self,
        markers: Vec<Vec2>,
        agents: Vec<AgentSeed>,
    ) -> Result<(), WorldStateError> {
        let flat: Vec<(f32, f32)> = markers.iter().map(|m| (m.x, m.y)).collect();
        self.index.rebuild(&flat)?;
        self.markers = MarkerSet::new(markers);
        self.agents.clear();
        self.runtime.clear();
        self.tick = Tick::zero();
        self.history.clear();
        for seed in agents {
            self.spawn_agent(seed);
        }
        Ok(())
    }

    /// Spawn a new agent, returning its handle.
    ///
    /// An agent spawned exactly on its goal gets a zero goal direction and
    /// stays put until something moves it.
    pub fn spawn_agent(&mut self, seed: AgentSeed) -> AgentId {
        let goal_direction = (seed.goal - seed.start)
            .try_normalize()
            .unwrap_or(Vec2::ZERO);
        let data = AgentData {
            position: Vec3::new(seed.start.x, AGENT_HEIGHT / 2.0, seed.start.y),
            plane_position: seed.start,
            goal: seed.goal,
            goal_direction,
            direction: goal_direction,
            color: seed.color,
        };
        let id = self.agents.insert(data);
        self.runtime.insert(id, AgentRuntime::default());
        id
    }

    /// Remove an agent by handle, returning its last known data.
    pub fn remove_agent(&mut self, id: AgentId) -> Option<AgentData> {
        self.runtime.remove(id);
        self.agents.remove(id)
    }

    /// Execute one simulation frame with the given elapsed seconds.
    ///
    /// Phase order is load-bearing: every claim is resolved before any
    /// direction is computed, and every direction before any position moves.
    pub fn step(&mut self, dt: f32) -> TickSummary {
        self.stage_clear();
        self.stage_claim();
        self.stage_collect_owned();
        self.stage_steer();
        self.stage_integrate(dt);
        self.tick = self.tick.next();

        let summary = self.summarize();
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
        summary
    }

    fn stage_clear(&mut self) {
        self.markers.clear_claims();
        for runtime in self.runtime.values_mut() {
            runtime.owned_markers.clear();
        }
    }

    fn stage_claim(&mut self) {
        let radius = self.config.neighborhood_radius;
        let threshold = OrderedFloat(self.config.claim_threshold);
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        let plane_positions = self.agents.columns().plane_positions();
        let markers = &mut self.markers;
        let index = &self.index;

        for (idx, id) in handles.iter().enumerate() {
            let plane = plane_positions[idx];
            index.markers_near((plane.x, plane.y), radius, &mut |marker, distance| {
                if distance < threshold {
                    markers.try_claim(marker, *id, distance);
                }
            });
        }
    }

    fn stage_collect_owned(&mut self) {
        for (marker, claim) in self.markers.claims().iter().enumerate() {
            if let Some(claim) = claim
                && let Some(runtime) = self.runtime.get_mut(claim.agent)
            {
                runtime.owned_markers.push(marker as u32);
            }
        }
    }

    fn stage_steer(&mut self) {
        if self.agents.is_empty() {
            return;
        }
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        let columns = self.agents.columns();
        let plane_positions = columns.plane_positions();
        let goal_directions = columns.goal_directions();
        let markers = &self.markers;
        let runtime = &self.runtime;
        let max_speed = self.config.max_speed;
        let cruise_speed = self.config.cruise_speed;

        let directions: Vec<Vec2> = handles
            .par_iter()
            .enumerate()
            .map(|(idx, id)| {
                let owned = runtime
                    .get(*id)
                    .map_or(&[][..], |rt| rt.owned_markers.as_slice());
                steer_direction(
                    owned,
                    markers,
                    plane_positions[idx],
                    goal_directions[idx],
                    max_speed,
                )
                .unwrap_or_else(|| goal_directions[idx] * cruise_speed)
            })
            .collect();

        self.agents
            .columns_mut()
            .directions_mut()
            .copy_from_slice(&directions);
    }

    fn stage_integrate(&mut self, dt: f32) {
        if self.agents.is_empty() {
            return;
        }
        let scale = if dt.is_finite() && dt > 0.0 {
            dt * self.config.speed_multiplier
        } else {
            0.0
        };

        let columns = self.agents.columns();
        let results: Vec<IntegrateResult> = (0..columns.len())
            .map(|idx| {
                let velocity = columns.directions()[idx] * scale;
                let plane = columns.plane_positions()[idx] + velocity;
                let goal_direction = (columns.goals()[idx] - plane)
                    .try_normalize()
                    .unwrap_or(columns.goal_directions()[idx]);
                IntegrateResult {
                    velocity,
                    goal_direction,
                }
            })
            .collect();

        let columns = self.agents.columns_mut();
        {
            let positions = columns.positions_mut();
            for (idx, result) in results.iter().enumerate() {
                positions[idx] += Vec3::new(result.velocity.x, 0.0, result.velocity.y);
            }
        }
        {
            let plane_positions = columns.plane_positions_mut();
            for (idx, result) in results.iter().enumerate() {
                plane_positions[idx] += result.velocity;
            }
        }
        {
            let goal_directions = columns.goal_directions_mut();
            for (idx, result) in results.iter().enumerate() {
                goal_directions[idx] = result.goal_direction;
            }
        }
    }

    fn summarize(&self) -> TickSummary {
        let agent_count = self.agents.len();
        let claimed_markers = self
            .markers
            .claims()
            .iter()
            .filter(|claim| claim.is_some())
            .count();

        let columns = self.agents.columns();
        let mut speed_sum = 0.0_f32;
        let mut goal_distance_sum = 0.0_f32;
        for idx in 0..agent_count {
            speed_sum += columns.directions()[idx].length();
            goal_distance_sum += (columns.goals()[idx] - columns.plane_positions()[idx]).length();
        }
        let normalizer = if agent_count > 0 {
            agent_count as f32
        } else {
            1.0
        };

        TickSummary {
            tick: self.tick,
            agent_count,
            marker_count: self.markers.len(),
            claimed_markers,
            average_speed: speed_sum / normalizer,
            average_goal_distance: goal_distance_sum / normalizer,
        }
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &CrowdConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Read-only access to the agent arena.
    #[must_use]
    pub fn agents(&self) -> &AgentArena {
        &self.agents
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Read-only access to the marker set and claim table.
    #[must_use]
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Borrow frame state for a specific agent.
    #[must_use]
    pub fn agent_runtime(&self, id: AgentId) -> Option<&AgentRuntime> {
        self.runtime.get(id)
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Produce a combined snapshot of an agent's columns and frame state.
    #[must_use]
    pub fn snapshot_agent(&self, id: AgentId) -> Option<AgentState> {
        let data = self.agents.snapshot(id)?;
        let owned_markers = self.runtime.get(id)?.owned_markers.clone();
        Some(AgentState {
            id,
            data,
            owned_markers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_config() -> CrowdConfig {
        CrowdConfig {
            plane_extent: 20.0,
            ..CrowdConfig::default()
        }
    }

    fn seed(start: Vec2, goal: Vec2) -> AgentSeed {
        AgentSeed {
            start,
            goal,
            color: [1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn config_rejects_uncovered_claim_threshold() {
        let config = CrowdConfig {
            neighborhood_radius: 3,
            claim_threshold: 4.0,
            ..CrowdConfig::default()
        };
        assert!(matches!(
            WorldState::new(config),
            Err(WorldStateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_rejects_degenerate_values() {
        for config in [
            CrowdConfig {
                plane_extent: 0.0,
                ..CrowdConfig::default()
            },
            CrowdConfig {
                claim_threshold: -1.0,
                ..CrowdConfig::default()
            },
            CrowdConfig {
                max_speed: 0.0,
                ..CrowdConfig::default()
            },
            CrowdConfig {
                cruise_speed: 9.0,
                ..CrowdConfig::default()
            },
            CrowdConfig {
                speed_multiplier: f32::NAN,
                ..CrowdConfig::default()
            },
            CrowdConfig {
                history_capacity: 0,
                ..CrowdConfig::default()
            },
        ] {
            assert!(WorldState::new(config).is_err());
        }
    }

    #[test]
    fn arena_insert_allocates_unique_handles() {
        let mut arena = AgentArena::new();
        let a = arena.insert(sample_agent(0.0));
        let b = arena.insert(sample_agent(1.0));
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
        assert!(arena.contains(a));
        assert!(arena.contains(b));
    }

    #[test]
    fn arena_remove_keeps_dense_storage_coherent() {
        let mut arena = AgentArena::new();
        let a = arena.insert(sample_agent(0.0));
        let b = arena.insert(sample_agent(1.0));
        let c = arena.insert(sample_agent(2.0));

        let removed = arena.remove(b).expect("agent removed");
        assert_eq!(removed.plane_position, Vec2::new(1.0, 1.0));
        assert_eq!(arena.len(), 2);
        assert!(arena.contains(a));
        assert!(arena.contains(c));
        assert!(!arena.contains(b));

        let snapshot_c = arena.snapshot(c).expect("snapshot");
        assert_eq!(snapshot_c.plane_position, Vec2::new(2.0, 2.0));
        assert_eq!(arena.index_of(c), Some(1));

        let d = arena.insert(sample_agent(3.0));
        assert_ne!(
            b, d,
            "generational handles should not be reused immediately"
        );
    }

    fn sample_agent(offset: f32) -> AgentData {
        AgentData {
            position: Vec3::new(offset, AGENT_HEIGHT / 2.0, offset),
            plane_position: Vec2::splat(offset),
            goal: Vec2::splat(offset + 5.0),
            goal_direction: Vec2::splat(std::f32::consts::FRAC_1_SQRT_2),
            direction: Vec2::ZERO,
            color: [0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn claim_competition_is_order_independent() {
        let mut arena = AgentArena::new();
        let near = arena.insert(sample_agent(0.0));
        let far = arena.insert(sample_agent(1.0));

        let mut forward = MarkerSet::new(vec![Vec2::ZERO]);
        assert!(forward.try_claim(0, near, OrderedFloat(1.0)));
        assert!(!forward.try_claim(0, far, OrderedFloat(2.0)));
        assert_eq!(forward.owner(0), Some(near));

        let mut reverse = MarkerSet::new(vec![Vec2::ZERO]);
        assert!(reverse.try_claim(0, far, OrderedFloat(2.0)));
        assert!(reverse.try_claim(0, near, OrderedFloat(1.0)));
        assert_eq!(reverse.owner(0), Some(near));
    }

    #[test]
    fn claim_revisit_by_owner_is_noop() {
        let mut arena = AgentArena::new();
        let owner = arena.insert(sample_agent(0.0));
        let mut markers = MarkerSet::new(vec![Vec2::ZERO]);
        assert!(markers.try_claim(0, owner, OrderedFloat(1.5)));
        assert!(!markers.try_claim(0, owner, OrderedFloat(1.5)));
        assert_eq!(markers.owner(0), Some(owner));
    }

    #[test]
    fn claim_tie_keeps_first_writer() {
        let mut arena = AgentArena::new();
        let first = arena.insert(sample_agent(0.0));
        let second = arena.insert(sample_agent(1.0));
        let mut markers = MarkerSet::new(vec![Vec2::ZERO]);
        assert!(markers.try_claim(0, first, OrderedFloat(2.0)));
        assert!(!markers.try_claim(0, second, OrderedFloat(2.0)));
        assert_eq!(markers.owner(0), Some(first));
    }

    #[test]
    fn marker_at_claim_threshold_stays_unclaimed() {
        let mut world = WorldState::new(small_config()).expect("world");
        world
            .load_scene(
                vec![Vec2::new(4.0, 0.0)],
                vec![seed(Vec2::ZERO, Vec2::new(8.0, 0.0))],
            )
            .expect("scene");

        world.step(1.0 / 60.0);
        assert_eq!(world.markers().owner(0), None);
    }

    #[test]
    fn no_marker_is_owned_by_two_agents() {
        let mut world = WorldState::new(small_config()).expect("world");
        let markers: Vec<Vec2> = (-3..=3)
            .flat_map(|x| (-3..=3).map(move |z| Vec2::new(x as f32 * 0.9, z as f32 * 0.9)))
            .collect();
        let agents = vec![
            seed(Vec2::new(-2.0, 0.0), Vec2::new(8.0, 0.0)),
            seed(Vec2::new(2.0, 0.0), Vec2::new(-8.0, 0.0)),
            seed(Vec2::new(0.0, 2.0), Vec2::new(0.0, -8.0)),
        ];
        world.load_scene(markers, agents).expect("scene");

        let summary = world.step(1.0 / 60.0);
        assert!(summary.claimed_markers > 0);

        let mut seen = std::collections::HashSet::new();
        for id in world.agents().iter_handles() {
            let state = world.snapshot_agent(id).expect("snapshot");
            for marker in state.owned_markers {
                assert!(
                    seen.insert(marker),
                    "marker {marker} appears in two owned lists"
                );
                assert_eq!(world.markers().owner(marker), Some(id));
            }
        }
        assert_eq!(seen.len(), summary.claimed_markers);
    }

    #[test]
    fn steering_direction_is_speed_capped() {
        let config = CrowdConfig {
            plane_extent: 20.0,
            max_speed: 0.05,
            cruise_speed: 0.05,
            ..CrowdConfig::default()
        };
        let mut world = WorldState::new(config).expect("world");
        world
            .load_scene(
                vec![Vec2::new(1.0, 0.0)],
                vec![seed(Vec2::ZERO, Vec2::new(8.0, 0.0))],
            )
            .expect("scene");

        world.step(1.0 / 60.0);
        let id = world.agents().iter_handles().next().expect("agent");
        let state = world.snapshot_agent(id).expect("snapshot");
        assert!(!state.owned_markers.is_empty());
        assert!(state.data.direction.length() <= 0.05 + 1e-6);
    }

    #[test]
    fn empty_neighborhood_falls_back_to_cruise() {
        let mut world = WorldState::new(small_config()).expect("world");
        world
            .load_scene(Vec::new(), vec![seed(Vec2::ZERO, Vec2::new(0.0, 9.0))])
            .expect("scene");

        let dt = 1.0;
        world.step(dt);
        let id = world.agents().iter_handles().next().expect("agent");
        let data = world.agents().snapshot(id).expect("snapshot");

        assert!(data.direction.is_finite());
        assert_abs_diff_eq!(data.direction.length(), world.config().cruise_speed, epsilon = 1e-5);
        let expected = world.config().cruise_speed * world.config().speed_multiplier * dt;
        assert_abs_diff_eq!(data.plane_position.y, expected, epsilon = 1e-4);
        assert_abs_diff_eq!(data.position.z, expected, epsilon = 1e-4);
        assert_abs_diff_eq!(data.position.y, AGENT_HEIGHT / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn agent_spawned_on_goal_stays_put() {
        let mut world = WorldState::new(small_config()).expect("world");
        world
            .load_scene(Vec::new(), vec![seed(Vec2::ZERO, Vec2::ZERO)])
            .expect("scene");

        for _ in 0..5 {
            world.step(1.0 / 60.0);
        }
        let id = world.agents().iter_handles().next().expect("agent");
        let data = world.agents().snapshot(id).expect("snapshot");
        assert!(data.plane_position.is_finite());
        assert_eq!(data.plane_position, Vec2::ZERO);
        assert_eq!(data.goal_direction, Vec2::ZERO);
    }

    #[test]
    fn coincident_marker_contributes_nothing() {
        let mut world = WorldState::new(small_config()).expect("world");
        world
            .load_scene(
                vec![Vec2::ZERO],
                vec![seed(Vec2::ZERO, Vec2::new(0.0, 9.0))],
            )
            .expect("scene");

        world.step(1.0 / 60.0);
        let id = world.agents().iter_handles().next().expect("agent");
        let data = world.agents().snapshot(id).expect("snapshot");
        // The only owned marker sits exactly underneath: fall back to cruise.
        assert!(data.direction.is_finite());
        assert_abs_diff_eq!(data.direction.length(), world.config().cruise_speed, epsilon = 1e-5);
    }

    #[test]
    fn nonpositive_dt_resolves_claims_but_moves_nothing() {
        let mut world = WorldState::new(small_config()).expect("world");
        world
            .load_scene(
                vec![Vec2::new(0.0, 2.0)],
                vec![seed(Vec2::ZERO, Vec2::new(0.0, 9.0))],
            )
            .expect("scene");

        let summary = world.step(0.0);
        assert_eq!(summary.claimed_markers, 1);
        let id = world.agents().iter_handles().next().expect("agent");
        let data = world.agents().snapshot(id).expect("snapshot");
        assert_eq!(data.plane_position, Vec2::ZERO);
        assert_eq!(world.tick(), Tick(1));
    }

    #[test]
    fn step_records_bounded_history() {
        let config = CrowdConfig {
            plane_extent: 20.0,
            history_capacity: 4,
            ..CrowdConfig::default()
        };
        let mut world = WorldState::new(config).expect("world");
        world
            .load_scene(Vec::new(), vec![seed(Vec2::ZERO, Vec2::new(5.0, 0.0))])
            .expect("scene");

        for _ in 0..10 {
            world.step(1.0 / 60.0);
        }
        assert_eq!(world.tick(), Tick(10));
        let history: Vec<_> = world.history().collect();
        assert_eq!(history.len(), 4);
        assert_eq!(history.last().expect("entry").tick, Tick(10));
    }

    #[test]
    fn load_scene_resets_population_and_time() {
        let mut world = WorldState::new(small_config()).expect("world");
        world
            .load_scene(
                vec![Vec2::new(1.0, 1.0)],
                vec![seed(Vec2::ZERO, Vec2::new(5.0, 0.0))],
            )
            .expect("scene");
        world.step(1.0 / 60.0);

        world
            .load_scene(
                vec![Vec2::new(-1.0, -1.0), Vec2::new(2.0, 2.0)],
                vec![
                    seed(Vec2::new(3.0, 3.0), Vec2::new(-5.0, 0.0)),
                    seed(Vec2::new(-3.0, -3.0), Vec2::new(5.0, 0.0)),
                ],
            )
            .expect("scene reset");

        assert_eq!(world.tick(), Tick::zero());
        assert_eq!(world.agent_count(), 2);
        assert_eq!(world.markers().len(), 2);
        assert_eq!(world.history().count(), 0);
    }

    #[test]
    fn out_of_plane_marker_fails_scene_load() {
        let mut world = WorldState::new(small_config()).expect("world");
        let err = world
            .load_scene(vec![Vec2::new(500.0, 0.0)], Vec::new())
            .unwrap_err();
        assert!(matches!(err, WorldStateError::InvalidScene(_)));
    }
}
