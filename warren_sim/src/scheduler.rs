// The per-tick state machine core every worker behavior runs on.
//
// A behavior is a table of targets. A target pairs an optional guard with
// an action and is either *event-scoped* (evaluated every tick, in
// registration order, before anything else) or *state-scoped* (evaluated
// only while the machine is in its state). One tick evaluates:
//
//   1. every event target in order — a blocking event target whose guard
//      matched ends the tick, transitioning if its action returned a state;
//      guardless ("supplier form") event targets end the tick only when
//      they return a state;
//   2. the first matching state target — its action runs, the returned
//      state (if any) is applied, and the target's tick-cost becomes the
//      inter-tick delay;
//   3. nothing matched — the agent idles this tick.
//
// Target tables are built once at agent construction and never change; the
// table itself is shared immutably across agents of the same behavior.
//
// Faults: actions return `Result`, and the single `?`-free catch point is
// here. A faulting tick ends early with an escalating backoff delay
// (`base_fault_timeout * fault_counter`, counter doubling each time, never
// reset unless `reset_fault_counter_on_success` is on) and a full-context
// error log. The simulation never sees the fault.
//
// See also: `worker.rs` for the standard target set (waiting gate, dump,
// request wait, pause), `construction.rs` for the build targets.
//
// **Critical constraint: determinism.** Evaluation order is the vector
// order; exactly one target fires per tick, making transitions strictly
// sequential and replayable.

use crate::agent::{Agent, Job};
use crate::building::Building;
use crate::config::WorkerConfig;
use crate::placement::PlacementRegistry;
use crate::types::CellPos;
use crate::world::CellWorld;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// The discrete state of a worker's task machine. Exactly one is active
/// per agent at any tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    Init,
    Idle,
    StartWorking,
    NeedsItem,
    GatheringRequiredMaterials,
    InventoryFull,
    Paused,
    StartBuilding,
    RemoveStep,
    ClearStep,
    BuildingStep,
    SpawnStep,
    DecorationStep,
    CompleteBuild,
    PickUpResiduals,
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// A runtime fault raised inside a tick action. Caught at the top of the
/// tick, logged, and converted into backoff — never propagated further.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerFault {
    pub message: String,
}

impl WorkerFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ---------------------------------------------------------------------------
// Tick environment
// ---------------------------------------------------------------------------

/// Everything a tick may read or mutate, borrowed from the simulation for
/// the duration of one `tick` call.
pub struct TickEnv<'a> {
    pub world: &'a mut CellWorld,
    pub building: &'a mut Building,
    pub agent: &'a mut Agent,
    pub job: &'a mut Job,
    pub config: &'a WorkerConfig,
    /// Process-wide placement handler registry, constructed once and passed
    /// by reference.
    pub registry: &'a PlacementRegistry,
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Guard: may the action run this tick? Pure read access.
pub type Guard<B> = fn(&B, &Machine, &TickEnv) -> bool;

/// Action: does the work, returns the state to transition to (`None` keeps
/// the current state / defers to later targets).
pub type Action<B> = fn(&mut B, &mut Machine, &mut TickEnv) -> Result<Option<AiState>, WorkerFault>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetScope {
    /// Evaluated every tick regardless of state.
    Event {
        /// A blocking event target whose guard matched ends the tick even
        /// when its action returns no new state.
        blocking: bool,
    },
    /// Evaluated only while the machine is in this state.
    State(AiState),
}

/// A registered (guard, action, tick-cost) rule.
pub struct Target<B> {
    pub scope: TargetScope,
    pub guard: Option<Guard<B>>,
    pub action: Action<B>,
    /// Inter-tick delay applied when this target fires (unless the action
    /// set its own delay).
    pub cost: u32,
}

impl<B> Target<B> {
    /// Supplier-form event target: no guard, fires only when the action
    /// returns a state.
    pub fn event(action: Action<B>) -> Self {
        Self {
            scope: TargetScope::Event { blocking: true },
            guard: None,
            action,
            cost: 0,
        }
    }

    /// Guarded blocking event target: a matched guard ends the tick.
    pub fn event_guarded(guard: Guard<B>, action: Action<B>, cost: u32) -> Self {
        Self {
            scope: TargetScope::Event { blocking: true },
            guard: Some(guard),
            action,
            cost,
        }
    }

    pub fn state(state: AiState, action: Action<B>, cost: u32) -> Self {
        Self {
            scope: TargetScope::State(state),
            guard: None,
            action,
            cost,
        }
    }

    pub fn state_guarded(
        state: AiState,
        guard: Guard<B>,
        action: Action<B>,
        cost: u32,
    ) -> Self {
        Self {
            scope: TargetScope::State(state),
            guard: Some(guard),
            action,
            cost,
        }
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// Per-agent machine scratch: current state, the delay countdown, and the
/// cached working/standing cells the waiting gate animates against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Machine {
    state: AiState,
    delay: u32,
    has_delayed: bool,
    pub current_working_cell: Option<CellPos>,
    pub current_standing_cell: Option<CellPos>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            state: AiState::Init,
            delay: 0,
            has_delayed: false,
            current_working_cell: None,
            current_standing_cell: None,
        }
    }

    pub fn state(&self) -> AiState {
        self.state
    }

    /// Force a state. Outside of tests this is only used when restoring a
    /// saved machine.
    pub fn set_state(&mut self, state: AiState) {
        self.state = state;
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Set the countdown before the next state-scoped action.
    pub fn set_delay(&mut self, timeout: u32) {
        self.delay = timeout;
    }

    pub fn add_delay(&mut self, timeout: u32) {
        self.delay += timeout;
    }

    pub fn tick_down_delay(&mut self, rate: u32) {
        self.delay = self.delay.saturating_sub(rate);
    }

    /// Cache the cell being worked (receives swing animations) and the cell
    /// to stand at, and start the countdown.
    pub fn work_on_cell(
        &mut self,
        working: Option<CellPos>,
        standing: Option<CellPos>,
        timeout: u32,
    ) {
        self.current_working_cell = working;
        self.current_standing_cell = standing;
        self.delay = timeout;
    }

    /// Drop the cached work cells and the countdown.
    pub fn clear_work_target(&mut self) {
        self.current_working_cell = None;
        self.current_standing_cell = None;
        self.delay = 0;
    }

    /// One-shot delay latch: the first call arms a delay and returns
    /// `true` ("wait"); the second call disarms and returns `false`.
    pub fn has_not_delayed(&mut self, time: u32) -> bool {
        if !self.has_delayed {
            self.set_delay(time);
            self.has_delayed = true;
            return true;
        }
        self.has_delayed = false;
        false
    }
}

// ---------------------------------------------------------------------------
// Target table
// ---------------------------------------------------------------------------

/// The ordered target table for one behavior type. Built once, immutable
/// afterwards, shared across all agents running the behavior.
pub struct TargetTable<B> {
    targets: Vec<Target<B>>,
}

impl<B> Default for TargetTable<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> TargetTable<B> {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
        }
    }

    pub fn register(&mut self, target: Target<B>) {
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Run one simulation step for one agent. Never panics out of a tick:
    /// faults are contained here with escalating backoff.
    pub fn tick(&self, m: &mut Machine, b: &mut B, env: &mut TickEnv) {
        match self.run_targets(m, b, env) {
            Ok(()) => {
                if env.config.reset_fault_counter_on_success {
                    env.agent.fault_counter = 1;
                }
            }
            Err(fault) => contain_fault(m, env, &fault),
        }
    }

    fn run_targets(&self, m: &mut Machine, b: &mut B, env: &mut TickEnv) -> Result<(), WorkerFault> {
        // Event pass: every event target, in registration order.
        for target in &self.targets {
            let TargetScope::Event { blocking } = target.scope else {
                continue;
            };
            let guarded = target.guard.is_some();
            if !target.guard.map_or(true, |g| g(b, m, env)) {
                continue;
            }
            let delay_before = m.delay;
            match (target.action)(b, m, env)? {
                Some(next) => {
                    apply(m, Some(next), target.cost, delay_before);
                    return Ok(());
                }
                // A matched guard on a blocking target suspends the tick
                // even without a transition; supplier-form targets just
                // pass evaluation along.
                None if blocking && guarded => return Ok(()),
                None => {}
            }
        }

        // State pass: the first target scoped to the current state whose
        // guard holds. At most one fires per tick.
        for target in &self.targets {
            if target.scope != TargetScope::State(m.state) {
                continue;
            }
            if !target.guard.map_or(true, |g| g(b, m, env)) {
                continue;
            }
            let delay_before = m.delay;
            let next = (target.action)(b, m, env)?;
            apply(m, next, target.cost, delay_before);
            return Ok(());
        }

        Ok(())
    }
}

/// Apply a fired target's result: transition (if any) and the tick-cost
/// delay — unless the action set a delay of its own, which wins.
fn apply(m: &mut Machine, next: Option<AiState>, cost: u32, delay_before: u32) {
    if let Some(state) = next {
        m.state = state;
    }
    if m.delay == delay_before {
        m.delay = cost;
    }
}

/// The one catch point for runtime faults: log with full context, apply
/// the escalating backoff, double the counter, end the tick.
fn contain_fault(m: &mut Machine, env: &mut TickEnv, fault: &WorkerFault) {
    let timeout = env
        .config
        .base_fault_timeout
        .saturating_mul(env.agent.fault_counter);
    m.set_delay(timeout);
    env.agent.fault_counter = env.agent.fault_counter.saturating_mul(2);
    tracing::error!(
        agent = %env.agent.name,
        job = ?env.job.kind,
        position = %env.agent.position,
        timeout,
        error = %fault,
        "pausing agent after tick fault"
    );
}
