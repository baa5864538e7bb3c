// The standard worker layer: the target set and helpers every concrete
// behavior shares.
//
// `WorkerBehavior` is the small capability surface a behavior exposes to
// the shared machinery — dump thresholds and predicates, nice-to-have
// items, the states to land in after pickups, and the cleanup/restart
// hooks. Everything else is fixed: `register_worker_targets` installs the
// same ordered target set for every behavior:
//
//   1. init safety check (INIT → IDLE once the world is sane)
//   2. visual-state refresh (runs every tick, never stops evaluation)
//   3. the waiting gate — while a delay is counting down, nothing below
//      here runs; walking toward the cached standing cell suspends the
//      countdown, and the cached working cell gets a swing every
//      `hit_every_x_ticks`
//   4. the inventory-dump protocol (one slot per tick, keep-table aware,
//      probabilistic when slots run out)
//   5. the request-waiting loop (status/prompt republish, delivery
//      transfer, re-issue on races)
//   6. the gathering state (walk to storage, pull the needed item)
//   7. pause / restart handling
//
// Registration order is load-bearing — it is the evaluation priority.
//
// See also: `scheduler.rs` for tick semantics, `gateway.rs` for the
// request façade, `construction.rs` for the structure behavior built on
// top of this layer.

use crate::gateway;
use crate::item::{ItemKind, ItemStack, ItemStorage, MAX_STACK};
use crate::request::ResolverKind;
use crate::scheduler::{AiState, Machine, Target, TargetTable, TickEnv, WorkerFault};
use crate::types::{CellPos, PromptPriority, RequestId, ToolKind};
use serde::{Deserialize, Serialize};

/// Per-agent scratch the worker layer threads between ticks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerState {
    /// Slot the dump cycle will try next.
    pub dump_slot: usize,
    /// Amounts retained so far during the current dump cycle.
    pub already_kept: Vec<ItemStorage>,
    /// Cached walk destination for the gathering state.
    pub walk_to: Option<CellPos>,
    /// What the gathering state is fetching.
    pub needs_currently: Option<ItemKind>,
}

/// Capability surface a concrete behavior exposes to the worker layer.
/// Defaults match a plain laborer; behaviors override what they need.
pub trait WorkerBehavior {
    fn worker_state(&self) -> &WorkerState;
    fn worker_state_mut(&mut self) -> &mut WorkerState;

    /// Actions done before the worker walks home to dump.
    fn actions_until_dump(&self, env: &TickEnv) -> u32 {
        env.config.actions_until_dump
    }

    /// Behavior-specific "dump now" predicate.
    fn wants_inventory_dump(&self, _env: &TickEnv) -> bool {
        false
    }

    /// Items worth keeping around; re-collected from storage after a dump.
    fn items_nice_to_have(&self, _env: &TickEnv) -> Vec<ItemStack> {
        Vec::new()
    }

    /// State to resume after the gathering state picked something up.
    fn state_after_pickup(&self) -> AiState {
        AiState::StartWorking
    }

    /// State to resume once all requests are resolved.
    fn after_request_pickup(&self) -> AiState {
        AiState::Idle
    }

    /// Total amount actually required of a delivered stack. Behaviors with
    /// better knowledge (a builder tracking remaining resources) override.
    fn total_required_amount(&self, stack: &ItemStack) -> u32 {
        stack.count
    }

    fn on_cleanup(&mut self, _env: &mut TickEnv) {}
    fn on_restart(&mut self, _env: &mut TickEnv) {}
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Install the standard worker target set. Call before registering any
/// behavior-specific targets — order is evaluation priority.
pub fn register_worker_targets<B: WorkerBehavior>(table: &mut TargetTable<B>) {
    // Init safety checks, then hand over to IDLE.
    table.register(Target::event(init_safety_checks::<B>));
    // Refresh the nameplate every tick; never stops evaluation.
    table.register(Target::event(update_visual_state::<B>));
    // The waiting gate: suspends everything below while a delay runs.
    table.register(Target::event_guarded(
        |_b, m, _env| m.delay() > 0,
        waiting_tick::<B>,
        1,
    ));
    // Dump inventory as long as needed; resolves back through afterDump.
    table.register(Target::event_guarded(
        |b, m, env| {
            m.state() == AiState::InventoryFull || inventory_needs_dump(b, m, env)
        },
        dump_inventory::<B>,
        0,
    ));
    // Wait on open/completed requests.
    table.register(Target::event_guarded(
        |_b, m, env| {
            m.state() == AiState::NeedsItem
                || env.building.has_completed_requests_for(env.agent.id)
                || env.building.has_open_requests_matching(env.agent.id, |r| {
                    !env.job.async_requests.contains(&r.id)
                })
        },
        wait_for_requests::<B>,
        0,
    ));
    // Fetch a needed item from storage.
    table.register(Target::state(
        AiState::GatheringRequiredMaterials,
        gather_needed_item::<B>,
        20,
    ));
    // Restart (cleanup + restart hooks, back to INIT).
    table.register(Target::event_guarded(
        |_b, _m, env| env.agent.should_restart && env.agent.paused,
        restart::<B>,
        0,
    ));
    // Leave PAUSED once unpaused.
    table.register(Target::state_guarded(
        AiState::Paused,
        |_b, _m, env| !env.agent.paused,
        |_b, _m, _env| Ok(Some(AiState::Idle)),
        20,
    ));
    // Stay paused.
    table.register(Target::state(AiState::Paused, be_paused::<B>, 0));
    // Entering pause runs the dump protocol first.
    table.register(Target::event_guarded(
        |_b, m, env| {
            env.agent.paused
                && m.state() != AiState::Paused
                && m.state() != AiState::InventoryFull
        },
        |_b, _m, _env| Ok(Some(AiState::InventoryFull)),
        0,
    ));
}

// ---------------------------------------------------------------------------
// Event actions
// ---------------------------------------------------------------------------

fn init_safety_checks<B: WorkerBehavior>(
    _b: &mut B,
    m: &mut Machine,
    _env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    if m.state() == AiState::Init {
        return Ok(Some(AiState::Idle));
    }
    Ok(None)
}

fn update_visual_state<B: WorkerBehavior>(
    _b: &mut B,
    m: &mut Machine,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    env.agent.state_tag = format!("{:?}", m.state());
    Ok(None)
}

/// One tick of the delay countdown. Walking toward the cached standing
/// cell suspends the countdown entirely; otherwise the countdown drops by
/// the tick rate and the cached working cell gets periodic swings.
fn waiting_tick<B: WorkerBehavior>(
    _b: &mut B,
    m: &mut Machine,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    if let Some(stand) = m.current_standing_cell
        && !env
            .agent
            .is_at_site_with_move(stand, env.config.default_range_for_delay)
    {
        // Still walking — don't decrease the delay.
        return Ok(None);
    }
    if m.current_working_cell.is_some() && m.delay() % env.config.hit_every_x_ticks == 0 {
        env.agent.swing_arm();
    }
    m.tick_down_delay(env.config.tick_rate);
    if m.delay() == 0 {
        m.clear_work_target();
    }
    Ok(None)
}

fn inventory_needs_dump<B: WorkerBehavior>(b: &B, m: &Machine, env: &TickEnv) -> bool {
    m.state() != AiState::InventoryFull
        && !env.job.is_dump_exempt()
        && (env.agent.inventory.is_full()
            || env.job.actions_done >= b.actions_until_dump(env)
            || b.wants_inventory_dump(env))
}

/// Walk home and dump the inventory into workplace storage, one slot per
/// tick, until nothing dumpable remains.
fn dump_inventory<B: WorkerBehavior>(
    b: &mut B,
    m: &mut Machine,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    let home = env.building.position;
    if !env
        .agent
        .is_at_site_with_move(home, env.config.default_range_for_delay)
    {
        return Ok(Some(AiState::InventoryFull));
    }

    if env.building.storage.is_full() {
        // Storage can't absorb anything: beg for pickups and give up on
        // this cycle rather than deadlocking.
        if !env.building.priority_static {
            let priority = env.config.max_pickup_priority;
            env.building.alter_pickup_priority(priority);
        }
        env.agent
            .trigger_prompt("workplace storage is full", PromptPriority::Important);
    } else if dump_one_more_slot(b, m, env) {
        m.add_delay(env.config.delay_recheck);
        return Ok(Some(AiState::InventoryFull));
    }

    b.worker_state_mut().already_kept.clear();
    b.worker_state_mut().dump_slot = 0;
    // Re-collect items worth having if storage holds them.
    for stack in b.items_nice_to_have(env) {
        gateway::is_in_hut(env, stack.kind);
    }
    env.job.clear_actions_done();
    if !env.building.priority_static {
        env.building
            .alter_pickup_priority(env.config.normal_pickup_priority);
    }
    // The dump may have pushed stock over the ceiling; shed the excess.
    env.building.trim_surplus(&mut env.agent.rng);
    after_dump(b, env)
}

fn after_dump<B: WorkerBehavior>(
    b: &mut B,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    if env.agent.paused {
        b.on_cleanup(env);
        return Ok(Some(AiState::Paused));
    }
    Ok(Some(AiState::Idle))
}

/// Dump one occupied slot. Returns `true` while more slots remain.
///
/// Near the end of the inventory, when open slots fall under twice the
/// floor, stacks the keep-table would retain are dumped anyway with a
/// coin flip (small stacks) or count-proportional chance (large stacks) —
/// holding everything back would deadlock a worker whose storage can't
/// absorb its load.
fn dump_one_more_slot<B: WorkerBehavior>(b: &mut B, m: &mut Machine, env: &mut TickEnv) -> bool {
    if walk_to_building(m, env) {
        return true;
    }

    let total = env.agent.inventory.size();
    let mut slot = b.worker_state().dump_slot;
    let stack = loop {
        if slot >= total {
            b.worker_state_mut().dump_slot = slot;
            return false;
        }
        match env.agent.inventory.get(slot) {
            Some(s) => break *s,
            None => slot += 1,
        }
    };

    let mut dump_anyway = false;
    if slot as u32 + env.config.min_open_slots * 2 >= total as u32 {
        let open_slots = env.agent.inventory.open_slot_count();
        if open_slots < env.config.min_open_slots * 2 {
            dump_anyway = if stack.count < env.config.coin_flip_dump_threshold {
                env.agent.rng.next_bool()
            } else {
                env.agent.rng.next_below(stack.count) < env.config.proportional_dump_chance
            };
        }
    }

    let amount = if dump_anyway {
        stack.count
    } else {
        env.building
            .dumpable_amount(&stack, &mut b.worker_state_mut().already_kept)
    };
    if amount > 0
        && let Some(taken) = env.agent.inventory.extract(slot, amount)
        && let Some(leftover) = env.building.storage.insert(taken)
    {
        // Storage couldn't take it all back — keep the remainder.
        env.agent.inventory.insert(leftover);
    }

    b.worker_state_mut().dump_slot = slot + 1;
    slot + 1 < total
}

// ---------------------------------------------------------------------------
// Request waiting
// ---------------------------------------------------------------------------

fn wait_for_requests<B: WorkerBehavior>(
    b: &mut B,
    m: &mut Machine,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    m.set_delay(env.config.delay_recheck);
    update_status_from_requests(env);
    look_for_requests(b, m, env)
}

/// Republish a human-readable status and raise prompts for open requests
/// handled by interactive resolvers.
fn update_status_from_requests(env: &mut TickEnv) {
    let agent_id = env.agent.id;
    let open = env.building.open_requests_for(agent_id);
    let completed = env.building.completed_requests_for(agent_id);

    if open.is_empty() && completed.is_empty() {
        env.agent.set_status(crate::agent::Status::Idle);
        return;
    }

    let mut prompts = Vec::new();
    for request in &open {
        if matches!(
            request.resolver,
            ResolverKind::Player | ResolverKind::Retrying
        ) {
            let priority = if env.job.async_requests.contains(&request.id) {
                PromptPriority::Pending
            } else {
                PromptPriority::Blocking
            };
            prompts.push((format!("needs {}", request.short_display()), priority));
        }
    }

    let display = completed
        .first()
        .or(open.first())
        .map(|r| r.short_display())
        .unwrap_or_default();
    env.agent.set_status(crate::agent::Status::Waiting(display));
    for (text, priority) in prompts {
        env.agent.trigger_prompt(text, priority);
    }
}

/// Poll the ledger until all sync requests are resolved and their
/// deliveries transferred into the agent inventory.
fn look_for_requests<B: WorkerBehavior>(
    b: &mut B,
    m: &mut Machine,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    let agent_id = env.agent.id;
    let has_open_sync = env.building.has_open_requests_matching(agent_id, |r| {
        !env.job.async_requests.contains(&r.id)
    });
    let has_completed = env.building.has_completed_requests_for(agent_id);
    if !has_open_sync && !has_completed {
        return Ok(Some(b.after_request_pickup()));
    }

    if !walk_to_building(m, env) && has_completed {
        m.add_delay(env.config.delay_recheck);

        // Completed requests with nothing to hand over are just accepted.
        let undeliverable: Vec<RequestId> = env
            .building
            .completed_requests_for(agent_id)
            .iter()
            .filter(|r| !r.can_be_delivered())
            .map(|r| r.id)
            .collect();
        for id in undeliverable {
            env.building.mark_request_accepted(id);
        }

        let first = env
            .building
            .completed_requests_for(agent_id)
            .iter()
            .find(|r| r.can_be_delivered())
            .map(|r| (r.id, r.kind, r.resolver, r.deliveries.clone()));

        if let Some((id, kind, resolver, deliveries)) = first {
            let was_async = env.job.async_requests.remove(&id);
            env.building.mark_request_accepted(id);

            let all_present = deliveries.iter().all(|d| {
                let held = env.agent.inventory.count_matching(|s| s.kind == d.kind);
                let stored = env.building.storage.count_matching(|s| s.kind == d.kind);
                held + stored >= d.count
            });

            if all_present {
                let nice = b.items_nice_to_have(env);
                transfer_deliveries(env, &deliveries, &nice);
                return Ok(Some(AiState::NeedsItem));
            }
            // Somebody else picked up our stack — re-issue and keep waiting.
            tracing::debug!(agent = %env.agent.name, request = %kind, "delivery vanished, re-requesting");
            let mode = if was_async {
                crate::request::RequestMode::Async
            } else {
                crate::request::RequestMode::Sync
            };
            let new_id =
                env.building
                    .create_request(&mut env.agent.rng, agent_id, kind, mode, resolver);
            if was_async {
                env.job.async_requests.insert(new_id);
            }
        }
    }

    Ok(Some(AiState::NeedsItem))
}

/// Move the delivered stacks into the agent inventory, pulling shortfalls
/// from workplace storage. When the inventory is packed, stacks that are
/// neither part of the delivery nor nice-to-have get swapped out to make
/// room.
fn transfer_deliveries(env: &mut TickEnv, deliveries: &[ItemStack], nice: &[ItemStack]) {
    let preferred = |s: &ItemStack| {
        deliveries.iter().any(|d| d.kind == s.kind) || nice.iter().any(|n| n.kind == s.kind)
    };

    for delivery in deliveries {
        let held = env
            .agent
            .inventory
            .count_matching(|s| s.kind == delivery.kind);
        let mut need = delivery.count.saturating_sub(held);
        while need > 0 {
            let Some(slot) = env
                .building
                .storage
                .find_first(|s| s.kind == delivery.kind)
            else {
                break;
            };
            let Some(taken) = env.building.storage.extract(slot, need) else {
                break;
            };
            need -= taken.count;
            if let Some(leftover) = env.agent.inventory.insert(taken) {
                // Swap a non-preferred stack out to storage and retry once.
                if let Some(victim) = env.agent.inventory.find_first(|s| !preferred(s))
                    && let Some(out) = env.agent.inventory.extract(victim, u32::MAX)
                {
                    env.building.storage.insert(out);
                    if let Some(still) = env.agent.inventory.insert(leftover) {
                        env.building.storage.insert(still);
                        return;
                    }
                } else {
                    env.building.storage.insert(leftover);
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Gathering
// ---------------------------------------------------------------------------

/// Fetch the currently needed item from workplace storage: walk home, find
/// it, transfer one stack, resume.
fn gather_needed_item<B: WorkerBehavior>(
    b: &mut B,
    m: &mut Machine,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    env.agent.set_status(crate::agent::Status::Gathering);
    m.set_delay(env.config.standard_delay);

    if b.worker_state().walk_to.is_none() && walk_to_building(m, env) {
        return Ok(Some(m.state()));
    }

    let Some(kind) = b.worker_state().needs_currently else {
        return Ok(Some(b.state_after_pickup()));
    };

    if b.worker_state().walk_to.is_none() {
        if !env.building.storage.has_matching(|s| s.kind == kind) {
            return Ok(Some(b.state_after_pickup()));
        }
        b.worker_state_mut().walk_to = Some(env.building.position);
    }
    let target = b.worker_state().walk_to.expect("walk_to set above");

    if walk_to_cell(m, env, target, env.config.default_range_for_delay) {
        m.set_delay(2);
        return Ok(Some(m.state()));
    }

    let transferred = transfer_from_storage(env, kind, MAX_STACK);
    b.worker_state_mut().walk_to = None;
    if !transferred {
        // Storage emptied under us; nothing left to fetch.
        b.worker_state_mut().needs_currently = None;
    }
    Ok(Some(b.state_after_pickup()))
}

/// Pull up to `limit` items of `kind` from workplace storage into the
/// agent inventory. Returns whether anything moved.
pub fn transfer_from_storage(env: &mut TickEnv, kind: ItemKind, limit: u32) -> bool {
    let Some(slot) = env.building.storage.find_first(|s| s.kind == kind) else {
        return false;
    };
    let Some(taken) = env.building.storage.extract(slot, limit) else {
        return false;
    };
    if let Some(leftover) = env.agent.inventory.insert(taken) {
        env.building.storage.insert(leftover);
    }
    true
}

// ---------------------------------------------------------------------------
// Pause / restart
// ---------------------------------------------------------------------------

fn be_paused<B: WorkerBehavior>(
    _b: &mut B,
    m: &mut Machine,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    // Idle animation while paused.
    env.agent.set_status(crate::agent::Status::Idle);
    m.set_delay(env.config.walk_delay);
    Ok(Some(AiState::Paused))
}

fn restart<B: WorkerBehavior>(
    b: &mut B,
    m: &mut Machine,
    env: &mut TickEnv,
) -> Result<Option<AiState>, WorkerFault> {
    b.on_cleanup(env);
    b.on_restart(env);
    m.set_delay(env.config.walk_delay);
    env.agent.should_restart = false;
    Ok(Some(AiState::Init))
}

// ---------------------------------------------------------------------------
// Walking
// ---------------------------------------------------------------------------

/// Head toward `stand`. Returns `true` while still walking; the waiting
/// gate carries the actual movement from here on.
pub fn walk_to_cell(m: &mut Machine, env: &mut TickEnv, stand: CellPos, range: u32) -> bool {
    if !env.agent.is_at_site_with_move(stand, range) {
        m.work_on_cell(None, Some(stand), env.config.delay_recheck);
        return true;
    }
    false
}

/// Head home to the workplace. Returns `true` while still walking.
pub fn walk_to_building(m: &mut Machine, env: &mut TickEnv) -> bool {
    let home = env.building.position;
    walk_to_cell(m, env, home, env.config.default_range_for_delay)
}

/// Find a spot to work from: ring-search the four cardinal directions at
/// increasing offsets for a floor cell with free headroom. Falls back to
/// the target itself when the search range is exhausted.
pub fn working_position(env: &TickEnv, distance: u32, target: CellPos) -> CellPos {
    const DIRECTIONS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, -1), (0, 1)];
    for offset in 0..=env.config.max_additional_range_to_build {
        let d = (distance + offset) as i32;
        for (dx, dz) in DIRECTIONS {
            let probe = env.world.find_floor(target.offset(dx * d, 0, dz * d));
            if env.world.has_free_headroom(probe) {
                return probe;
            }
        }
    }
    target
}

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

/// Hold the most efficient usable tool for `block`. Requests one (sync)
/// when nothing in the inventory qualifies; returns `false` until a tool
/// is in hand. Cells needing no tool always succeed bare-handed.
pub fn hold_efficient_tool(
    m: &mut Machine,
    env: &mut TickEnv,
    block: crate::types::CellBlock,
    pos: CellPos,
) -> bool {
    if let Some(slot) = env
        .agent
        .inventory
        .most_efficient_tool(block, env.building.max_tool_level)
    {
        env.agent.held_slot = Some(slot);
        return true;
    }
    if ToolKind::best_for(block) == ToolKind::None {
        env.agent.held_slot = None;
        return true;
    }
    request_tool(m, env, block, pos);
    false
}

fn request_tool(m: &mut Machine, env: &mut TickEnv, block: crate::types::CellBlock, pos: CellPos) {
    let required = ToolKind::required_level(block);
    if env.building.max_tool_level < required {
        env.agent.trigger_prompt(
            format!("workplace cannot provide a level {required} tool for {block:?} at {pos}"),
            PromptPriority::Important,
        );
    }
    gateway::check_for_tool_or_weapon(m, env, ToolKind::best_for(block), required);
}

/// Timed mine action: hold the right tool, wait out the scaled delay, then
/// break the cell and pocket its drops. Returns `true` once the cell is
/// gone.
pub fn mine_cell(m: &mut Machine, env: &mut TickEnv, pos: CellPos, stand: CellPos) -> bool {
    let block = env.world.get(pos).block;
    if block == crate::types::CellBlock::Air {
        return true;
    }
    if !hold_efficient_tool(m, env, block, pos) {
        return false;
    }

    let level = env.agent.level(env.config);
    let delay = env.config.scaled_delay(env.config.mine_delay, level);
    if m.has_not_delayed(delay) {
        m.current_working_cell = Some(pos);
        m.current_standing_cell = Some(stand);
        return false;
    }

    for drop in env.world.drops_of(pos) {
        if let Some(leftover) = env.agent.inventory.insert(drop) {
            env.world.scatter_item(pos, leftover);
        }
    }
    env.world.set(pos, crate::types::CellState::AIR);
    env.agent.swing_arm();
    if let Some(slot) = env.agent.held_slot
        && let Some(stack) = env.agent.inventory.get(slot).copied()
        && stack.kind.is_tool()
    {
        let mut worn = stack;
        if worn.damage(1) {
            env.agent.inventory.set(slot, None);
            env.agent.held_slot = None;
        } else {
            env.agent.inventory.set(slot, Some(worn));
        }
    }
    true
}

/// Count an action toward the dump threshold and spend saturation.
pub fn increment_actions_done_and_dec_saturation(env: &mut TickEnv) {
    env.agent.decrease_saturation_for_action(env.config);
    env.job.increment_actions_done();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;
    use crate::types::CellBlock;

    /// Bare behavior: defaults only.
    #[derive(Default)]
    struct Plain {
        ws: WorkerState,
    }

    impl WorkerBehavior for Plain {
        fn worker_state(&self) -> &WorkerState {
            &self.ws
        }
        fn worker_state_mut(&mut self) -> &mut WorkerState {
            &mut self.ws
        }
    }

    fn plain_table() -> TargetTable<Plain> {
        let mut table = TargetTable::new();
        register_worker_targets(&mut table);
        table
    }

    #[test]
    fn init_transitions_to_idle() {
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        table.tick(&mut m, &mut b, &mut fx.env());
        assert_eq!(m.state(), AiState::Idle);
    }

    #[test]
    fn delay_suppresses_state_targets_for_its_duration() {
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        table.tick(&mut m, &mut b, &mut fx.env()); // Init -> Idle
        m.set_delay(3);
        for expected in [2u32, 1, 0] {
            table.tick(&mut m, &mut b, &mut fx.env());
            assert_eq!(m.delay(), expected);
            assert_eq!(m.state(), AiState::Idle, "no transition while waiting");
        }
        // Working cell and standing cell cleared once drained.
        assert!(m.current_working_cell.is_none());
        assert!(m.current_standing_cell.is_none());
    }

    #[test]
    fn walking_to_standing_cell_does_not_decrement_delay() {
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        table.tick(&mut m, &mut b, &mut fx.env()); // Init -> Idle

        // Stand 8 cells east; the gate should walk before counting down.
        let stand = fx.agent.position.offset(8, 0, 0);
        m.work_on_cell(None, Some(stand), 5);
        let start_x = fx.agent.position.x;
        table.tick(&mut m, &mut b, &mut fx.env());
        assert_eq!(m.delay(), 5, "delay untouched while walking");
        assert_eq!(fx.agent.position.x, start_x + 1, "walked one cell");
    }

    #[test]
    fn working_cell_receives_periodic_swings() {
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        table.tick(&mut m, &mut b, &mut fx.env()); // Init -> Idle

        let hit_every = fx.config.hit_every_x_ticks;
        m.work_on_cell(Some(fx.agent.position), None, hit_every * 2);
        let swings_before = fx.agent.swings;
        for _ in 0..(hit_every * 2) {
            table.tick(&mut m, &mut b, &mut fx.env());
        }
        assert_eq!(fx.agent.swings - swings_before, 2);
    }

    #[test]
    fn paused_agent_parks_in_paused_state() {
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        fx.agent.paused = true;

        table.tick(&mut m, &mut b, &mut fx.env()); // Init -> Idle first
        assert_eq!(m.state(), AiState::Idle);
        table.tick(&mut m, &mut b, &mut fx.env());
        // Pause entry goes through the dump protocol.
        assert_eq!(m.state(), AiState::InventoryFull);
        // Empty inventory dumps instantly and lands in Paused.
        m.set_delay(0);
        table.tick(&mut m, &mut b, &mut fx.env());
        assert_eq!(m.state(), AiState::Paused);

        // Unpause: restart flag routes through cleanup back to Init.
        fx.agent.should_restart = true;
        m.set_delay(0);
        table.tick(&mut m, &mut b, &mut fx.env());
        assert_eq!(m.state(), AiState::Init);
        assert!(!fx.agent.should_restart);
    }

    #[test]
    fn full_inventory_dumps_one_slot_per_tick() {
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        table.tick(&mut m, &mut b, &mut fx.env()); // Init -> Idle

        // Stuff every slot.
        let size = fx.agent.inventory.size() as u32;
        for _ in 0..size {
            fx.agent.inventory.insert(ItemStack::new(
                ItemKind::Block(CellBlock::Stone),
                MAX_STACK,
            ));
        }
        assert!(fx.agent.inventory.is_full());

        let mut ticks = 0;
        while m.state() != AiState::Idle || fx.agent.inventory.count_matching(|_| true) > 0 {
            m.set_delay(0);
            table.tick(&mut m, &mut b, &mut fx.env());
            ticks += 1;
            assert!(ticks < 200, "dump must converge");
            if m.state() == AiState::Idle && fx.agent.inventory.count_matching(|_| true) == 0 {
                break;
            }
        }
        assert_eq!(fx.agent.inventory.count_matching(|_| true), 0);
        assert!(
            fx.building
                .storage
                .count_matching(|s| s.kind == ItemKind::Block(CellBlock::Stone))
                > 0
        );
        assert_eq!(fx.job.actions_done, 0, "dump clears the action counter");
    }

    #[test]
    fn dump_keeps_keep_table_amounts() {
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        table.tick(&mut m, &mut b, &mut fx.env());

        let plank = ItemKind::Block(CellBlock::Plank);
        fx.building.set_keep(plank, 10);
        fx.agent.inventory.insert(ItemStack::new(plank, 30));
        // Trigger a dump via the action counter.
        fx.job.actions_done = fx.config.actions_until_dump;

        let mut ticks = 0;
        loop {
            m.set_delay(0);
            table.tick(&mut m, &mut b, &mut fx.env());
            ticks += 1;
            assert!(ticks < 100, "dump must converge");
            if m.state() == AiState::Idle {
                break;
            }
        }
        assert_eq!(
            fx.agent.inventory.count_matching(|s| s.kind == plank),
            10,
            "keep-table amount stays with the worker"
        );
    }

    #[test]
    fn near_full_inventory_converges_probabilistically() {
        // Inventory almost full of stacks the keep-table would retain:
        // without the dump-anyway rule the worker would deadlock.
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        table.tick(&mut m, &mut b, &mut fx.env());

        let plank = ItemKind::Block(CellBlock::Plank);
        // Keep "everything" — the keep-table alone would never dump.
        fx.building.set_keep(plank, u32::MAX);
        let size = fx.agent.inventory.size() as u32;
        for _ in 0..size {
            fx.agent.inventory.insert(ItemStack::new(plank, MAX_STACK));
        }
        assert_eq!(fx.agent.inventory.open_slot_count(), 0);

        let mut ticks = 0;
        loop {
            m.set_delay(0);
            table.tick(&mut m, &mut b, &mut fx.env());
            ticks += 1;
            if !fx.agent.inventory.is_full() {
                break;
            }
            assert!(ticks < 2000, "probabilistic dump must converge");
        }
    }

    #[test]
    fn gathering_fetches_needed_item_from_storage() {
        let mut fx = Fixture::new();
        let table = plain_table();
        let mut m = Machine::new();
        let mut b = Plain::default();
        table.tick(&mut m, &mut b, &mut fx.env());

        let glass = ItemKind::Block(CellBlock::Glass);
        fx.building.storage.insert(ItemStack::new(glass, 12));
        b.ws.needs_currently = Some(glass);
        m.set_state(AiState::GatheringRequiredMaterials);

        let mut ticks = 0;
        while m.state() == AiState::GatheringRequiredMaterials {
            m.set_delay(0);
            table.tick(&mut m, &mut b, &mut fx.env());
            ticks += 1;
            assert!(ticks < 100, "gathering must finish");
        }
        assert_eq!(m.state(), AiState::StartWorking);
        assert_eq!(fx.agent.inventory.count_matching(|s| s.kind == glass), 12);
    }

    #[test]
    fn working_position_finds_floor_with_headroom() {
        let mut fx = Fixture::new();
        // A pillar at the target itself; the search must land beside it.
        let target = CellPos::new(10, 1, 10);
        fx.world.set(target, crate::types::CellState::of(CellBlock::Stone));
        let spot = working_position(&fx.env(), 2, target);
        assert_ne!(spot, target);
        assert!(fx.world.has_free_headroom(spot));
        assert!(spot.chebyshev_distance(target) >= 2);
    }

    #[test]
    fn mine_cell_takes_tool_delay_then_drops() {
        let mut fx = Fixture::new();
        let mut m = Machine::new();
        let pos = CellPos::new(3, 1, 3);
        fx.world.set(pos, crate::types::CellState::of(CellBlock::Soil));
        fx.agent
            .inventory
            .insert(ItemStack::tool(ToolKind::Shovel, 0));

        let mut env = fx.env();
        // First call arms the delay.
        assert!(!mine_cell(&mut m, &mut env, pos, pos.offset(1, 0, 0)));
        assert!(m.delay() > 0);
        // Second call (delay elapsed) breaks the cell.
        assert!(mine_cell(&mut m, &mut env, pos, pos.offset(1, 0, 0)));
        drop(env);
        assert!(fx.world.get(pos).is_air());
        assert_eq!(
            fx.agent
                .inventory
                .count_matching(|s| s.kind == ItemKind::Block(CellBlock::Soil)),
            1
        );
    }

    #[test]
    fn mine_cell_without_tool_requests_one() {
        let mut fx = Fixture::new();
        let mut m = Machine::new();
        let pos = CellPos::new(3, 1, 3);
        fx.world.set(pos, crate::types::CellState::of(CellBlock::Stone));

        let mut env = fx.env();
        assert!(!mine_cell(&mut m, &mut env, pos, pos));
        drop(env);
        let agent = fx.agent.id;
        assert!(fx.building.has_open_requests_matching(agent, |r| matches!(
            r.kind,
            crate::request::RequestKind::Tool { class: ToolKind::Pickaxe, .. }
        )));
    }
}
