// Worker agents and their job descriptors.
//
// An `Agent` is the entity doing the work: position, bounded inventory, its
// own PRNG stream, the pause/restart flags the colony UI toggles, and the
// fault counter the scheduler's backoff reads. Agents are spawned and
// destroyed by the surrounding colony systems — this crate only reads and
// mutates the state they carry.
//
// A `Job` is the per-agent task descriptor: behavior kind, the actions-done
// counter that triggers inventory dumps, the set of outstanding async
// request ids, and the structure handle while a build is underway. A job is
// reset wholesale when the agent is reassigned.
//
// Movement is deliberately primitive: one cell of Chebyshev travel per
// step, no pathfinding. The scheduler only ever asks "are you there yet,
// and if not, take a step" — everything else is delay bookkeeping.
//
// See also: `scheduler.rs` for the tick loop that drives agents,
// `building.rs` for the workplace, `structure.rs` for the build handle.

use crate::config::WorkerConfig;
use crate::item::Inventory;
use crate::prng::GameRng;
use crate::structure::Structure;
use crate::types::{AgentId, CellPos, PromptPriority, RequestId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Status and prompts
// ---------------------------------------------------------------------------

/// High-level activity, surfaced as the agent's status text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Idle,
    Gathering,
    Clearing,
    Building,
    Decorating,
    Spawning,
    WaitingForBuild,
    /// Waiting on a request; carries its short display string.
    Waiting(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "idle"),
            Status::Gathering => write!(f, "gathering"),
            Status::Clearing => write!(f, "clearing"),
            Status::Building => write!(f, "building"),
            Status::Decorating => write!(f, "decorating"),
            Status::Spawning => write!(f, "spawning"),
            Status::WaitingForBuild => write!(f, "waiting for a build order"),
            Status::Waiting(what) => write!(f, "waiting for {what}"),
        }
    }
}

/// An interactive prompt raised toward the player. Recorded on the agent;
/// the UI layer drains these.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub text: String,
    pub priority: PromptPriority,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// An autonomous worker entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub position: CellPos,
    pub inventory: Inventory,
    /// The agent's own randomness stream (probabilistic dumping, spawn ids).
    pub rng: GameRng,
    /// Externally toggled: the worker idles until unpaused.
    pub paused: bool,
    /// Externally toggled: the worker should run its restart path.
    pub should_restart: bool,
    /// Multiplier for the fault backoff. Starts at 1 and doubles per fault.
    pub fault_counter: u32,
    pub experience: f32,
    pub saturation: f32,
    pub status: Status,
    /// Raw machine-state label, refreshed every tick for the nameplate.
    pub state_tag: String,
    pub prompts: Vec<Prompt>,
    /// Slot of the currently held item, if any.
    pub held_slot: Option<usize>,
    /// Work-animation counter; bumped on every arm swing.
    pub swings: u64,
}

impl Agent {
    pub fn new(id: AgentId, name: impl Into<String>, position: CellPos, seed: u64,
               config: &WorkerConfig) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            inventory: Inventory::new(config.inventory_size),
            rng: GameRng::new(seed),
            paused: false,
            should_restart: false,
            fault_counter: 1,
            experience: 0.0,
            saturation: 10.0,
            status: Status::Idle,
            state_tag: String::new(),
            prompts: Vec::new(),
            held_slot: None,
            swings: 0,
        }
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn trigger_prompt(&mut self, text: impl Into<String>, priority: PromptPriority) {
        let text = text.into();
        // The same prompt re-raised every recheck would flood the list.
        if self.prompts.iter().any(|p| p.text == text) {
            return;
        }
        self.prompts.push(Prompt { text, priority });
    }

    pub fn add_experience(&mut self, amount: f32) {
        self.experience += amount;
    }

    /// Experience level, used to scale work delays.
    pub fn level(&self, config: &WorkerConfig) -> u32 {
        (self.experience / config.xp_per_level) as u32
    }

    pub fn decrease_saturation_for_action(&mut self, config: &WorkerConfig) {
        self.saturation = (self.saturation - config.saturation_per_action).max(0.0);
    }

    pub fn decrease_saturation_for_continuous_action(&mut self, config: &WorkerConfig) {
        self.saturation =
            (self.saturation - config.saturation_per_continuous_action).max(0.0);
    }

    pub fn swing_arm(&mut self) {
        self.swings += 1;
    }

    /// Move one cell toward `target` (sign step on every axis).
    pub fn step_toward(&mut self, target: CellPos) {
        self.position = CellPos::new(
            self.position.x + (target.x - self.position.x).signum(),
            self.position.y + (target.y - self.position.y).signum(),
            self.position.z + (target.z - self.position.z).signum(),
        );
    }

    pub fn is_within(&self, target: CellPos, range: u32) -> bool {
        self.position.chebyshev_distance(target) <= range
    }

    /// "Am I there yet?" — returns `true` when within `range` of `target`;
    /// otherwise takes one step toward it and returns `false`.
    pub fn is_at_site_with_move(&mut self, target: CellPos, range: u32) -> bool {
        if self.is_within(target, range) {
            return true;
        }
        self.step_toward(target);
        false
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Behavior class of a job. Couriers are exempt from the inventory-dump
/// protocol — their whole job is carrying.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[default]
    Builder,
    Courier,
}

/// Per-agent task descriptor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Job {
    pub kind: JobKind,
    /// Counted actions since the last inventory dump.
    pub actions_done: u32,
    /// Async request ids still outstanding for this job.
    pub async_requests: BTreeSet<RequestId>,
    /// The structure being built, while a build is underway.
    pub structure: Option<Structure>,
    /// Externally set: the current build order was withdrawn.
    pub cancelled: bool,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn increment_actions_done(&mut self) {
        self.actions_done += 1;
    }

    pub fn clear_actions_done(&mut self) {
        self.actions_done = 0;
    }

    pub fn is_dump_exempt(&self) -> bool {
        self.kind == JobKind::Courier
    }

    /// Reassignment wipes everything but the kind.
    pub fn reset(&mut self) {
        *self = Self::new(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_agent() -> Agent {
        let config = WorkerConfig::default();
        let mut rng = GameRng::new(1);
        Agent::new(
            AgentId::new(&mut rng),
            "alrik",
            CellPos::new(0, 0, 0),
            42,
            &config,
        )
    }

    #[test]
    fn step_toward_closes_chebyshev_distance() {
        let mut agent = test_agent();
        let target = CellPos::new(3, 1, -2);
        let mut steps = 0;
        while !agent.is_within(target, 0) {
            agent.step_toward(target);
            steps += 1;
            assert!(steps <= 10, "walk must terminate");
        }
        assert_eq!(agent.position, target);
        assert_eq!(steps, 3, "diagonal moves count once");
    }

    #[test]
    fn is_at_site_with_move_advances_until_in_range() {
        let mut agent = test_agent();
        let target = CellPos::new(5, 0, 0);
        assert!(!agent.is_at_site_with_move(target, 2));
        assert!(!agent.is_at_site_with_move(target, 2));
        assert!(!agent.is_at_site_with_move(target, 2));
        // Now at x=3, within Chebyshev range 2 of x=5.
        assert!(agent.is_at_site_with_move(target, 2));
        assert_eq!(agent.position, CellPos::new(3, 0, 0));
    }

    #[test]
    fn duplicate_prompts_are_suppressed() {
        let mut agent = test_agent();
        agent.trigger_prompt("need planks", PromptPriority::Blocking);
        agent.trigger_prompt("need planks", PromptPriority::Blocking);
        agent.trigger_prompt("need stone", PromptPriority::Pending);
        assert_eq!(agent.prompts.len(), 2);
    }

    #[test]
    fn level_follows_experience() {
        let config = WorkerConfig::default();
        let mut agent = test_agent();
        assert_eq!(agent.level(&config), 0);
        agent.add_experience(config.xp_per_level * 3.0 + 1.0);
        assert_eq!(agent.level(&config), 3);
    }

    #[test]
    fn job_reset_keeps_kind_only() {
        let mut job = Job::new(JobKind::Builder);
        job.actions_done = 7;
        job.cancelled = true;
        job.reset();
        assert_eq!(job.kind, JobKind::Builder);
        assert_eq!(job.actions_done, 0);
        assert!(!job.cancelled);
        assert!(job.structure.is_none());
    }

    #[test]
    fn courier_is_dump_exempt() {
        assert!(Job::new(JobKind::Courier).is_dump_exempt());
        assert!(!Job::new(JobKind::Builder).is_dump_exempt());
    }

    #[test]
    fn agent_serialization_roundtrip() {
        let mut agent = test_agent();
        agent.set_status(Status::Building);
        agent.fault_counter = 4;
        let json = serde_json::to_string(&agent).unwrap();
        let restored: Agent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, agent.id);
        assert_eq!(restored.status, Status::Building);
        assert_eq!(restored.fault_counter, 4);
    }
}
