// The request gateway: the façade a worker uses to answer "do I have X,
// is X already requested, request X".
//
// Everything here consults three places in order — the agent inventory,
// the workplace storage, the workplace request ledger — and only then
// creates a new request. Deduplication is the whole point: repeated ticks
// over the same blocked cell must never stack up equivalent requests, so
// every create is preceded by an equivalence scan of the open ledger
// (`RequestKind::equivalent`).
//
// `check_for_list_in_inv_and_request` is the batch entry point the
// placement protocol uses: prune what the inventory already covers, drop
// free materials, aggregate the rest by item identity, and raise at most
// one new request per call. Its `true` return means "still missing
// something — block this tick and retry".
//
// Tool procurement is the specialized case: tools match by class and
// level band rather than exact kind, and a sufficient tool already in the
// inventory or hut storage short-circuits the request entirely.
//
// See also: `request.rs` for the record types, `building.rs` for the
// ledger, `worker.rs` for the waiting loop that consumes completions.

use crate::item::{ItemKind, ItemStack, ItemStorage};
use crate::request::{RequestKind, RequestMode, ResolverKind};
use crate::scheduler::{Machine, TickEnv};
use crate::types::ToolKind;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Inventory / hut checks
// ---------------------------------------------------------------------------

/// Whether the agent carries at least `min_count` of `kind`.
pub fn has_in_inventory(env: &TickEnv, kind: ItemKind, min_count: u32) -> bool {
    env.agent.inventory.count_matching(|s| s.kind == kind) >= min_count
}

/// Search workplace storage for `kind`; when found, move the first
/// matching stack into the agent inventory. Returns whether one was found.
pub fn is_in_hut(env: &mut TickEnv, kind: ItemKind) -> bool {
    let Some(slot) = env.building.storage.find_first(|s| s.kind == kind) else {
        return false;
    };
    let Some(taken) = env.building.storage.extract(slot, u32::MAX) else {
        return false;
    };
    if let Some(leftover) = env.agent.inventory.insert(taken) {
        env.building.storage.insert(leftover);
    }
    true
}

// ---------------------------------------------------------------------------
// Single-stack requests
// ---------------------------------------------------------------------------

/// True if the stack's kind is already in the inventory; otherwise ensure
/// a sync request for it exists (creating one only if no equivalent open
/// request does) and report `false`.
pub fn check_if_request_exists_or_create(env: &mut TickEnv, stack: &ItemStack) -> bool {
    if env.agent.inventory.has_matching(|s| s.kind == stack.kind) {
        return true;
    }
    let ask = RequestKind::Stack(ItemStorage::of_stack(stack));
    if !env
        .building
        .has_open_requests_matching(env.agent.id, |r| r.kind.equivalent(&ask))
    {
        env.building.create_request(
            &mut env.agent.rng,
            env.agent.id,
            ask,
            RequestMode::Sync,
            ResolverKind::Warehouse,
        );
    }
    false
}

/// Async variant: the full amount already in the inventory counts, a
/// sufficient amount in hut storage is pulled over directly, and only
/// then is an async request raised (tracked on the job).
pub fn check_if_request_exists_or_create_async(env: &mut TickEnv, stack: &ItemStack) -> bool {
    if has_in_inventory(env, stack.kind, stack.count) {
        return true;
    }

    let stored = env
        .building
        .storage
        .count_matching(|s| s.kind == stack.kind);
    if stored >= stack.count {
        let mut remaining = stack.count;
        while remaining > 0 {
            let Some(slot) = env.building.storage.find_first(|s| s.kind == stack.kind) else {
                break;
            };
            let Some(taken) = env.building.storage.extract(slot, remaining) else {
                break;
            };
            remaining -= taken.count;
            if let Some(leftover) = env.agent.inventory.insert(taken) {
                env.building.storage.insert(leftover);
                break;
            }
        }
        return true;
    }

    let ask = RequestKind::Stack(ItemStorage::of_stack(stack));
    if !env
        .building
        .has_open_requests_matching(env.agent.id, |r| r.kind.equivalent(&ask))
    {
        let id = env.building.create_request(
            &mut env.agent.rng,
            env.agent.id,
            ask,
            RequestMode::Async,
            ResolverKind::Warehouse,
        );
        env.job.async_requests.insert(id);
    }
    false
}

// ---------------------------------------------------------------------------
// Batch material bookkeeping
// ---------------------------------------------------------------------------

/// Prune `items` against the inventory, drop free materials, aggregate the
/// remainder by item identity, and raise at most one new request.
///
/// `force` demands exact amounts (inventory counts are subtracted from the
/// requirements); without it, any stack of the right kind in the inventory
/// satisfies that requirement outright.
///
/// Returns `true` while anything is still missing — the caller blocks the
/// current cell and retries next tick. Calling again with an unchanged
/// inventory never duplicates a request.
pub fn check_for_list_in_inv_and_request(
    env: &mut TickEnv,
    items: &mut Vec<ItemStack>,
    force: bool,
) -> bool {
    if force {
        for item in items.iter_mut() {
            let present = env.agent.inventory.count_matching(|s| s.kind == item.kind);
            item.count = item.count.saturating_sub(present);
        }
        items.retain(|s| !s.is_empty());
    } else {
        items.retain(|s| {
            !s.is_empty() && !env.agent.inventory.has_matching(|held| held.kind == s.kind)
        });
    }
    // Always-available fillers are never requested.
    items.retain(|s| match s.kind {
        ItemKind::Block(b) => !b.is_free_material(),
        ItemKind::Tool { .. } => true,
    });

    let mut needed: BTreeMap<ItemStorage, u32> = BTreeMap::new();
    for item in items.iter() {
        *needed
            .entry(ItemStorage::of_stack(item))
            .or_insert(0) += item.count;
    }
    if needed.is_empty() {
        return false;
    }

    for (storage, amount) in &needed {
        let ask = RequestKind::Stack(ItemStorage::new(storage.kind, *amount));
        if !env
            .building
            .has_open_requests_matching(env.agent.id, |r| r.kind.equivalent(&ask))
        {
            env.building.create_request(
                &mut env.agent.rng,
                env.agent.id,
                ask,
                RequestMode::Sync,
                ResolverKind::Warehouse,
            );
            // One new request per call; the rest wait for the next tick.
            break;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Tool procurement
// ---------------------------------------------------------------------------

fn tool_band_matches(r: &crate::request::Request, class: ToolKind, min_level: u32) -> bool {
    matches!(r.kind, RequestKind::Tool { class: c, min_level: ml, .. }
        if c == class && ml >= min_level)
}

/// Ensure a usable tool of `class` (at least `min_level`) is on hand.
/// Returns `true` while the worker still needs one — a sync request is
/// raised unless an equivalent open or completed request already exists.
pub fn check_for_tool_or_weapon(
    m: &mut Machine,
    env: &mut TickEnv,
    class: ToolKind,
    min_level: u32,
) -> bool {
    if class == ToolKind::None {
        return false;
    }
    let agent_id = env.agent.id;
    let open = env
        .building
        .has_open_requests_matching(agent_id, |r| tool_band_matches(r, class, min_level));
    let completed = env
        .building
        .has_completed_requests_matching(agent_id, |r| tool_band_matches(r, class, min_level));

    if check_for_needed_tool(m, env, class, min_level) {
        if !open && !completed {
            let max_level = env.building.max_tool_level.max(min_level);
            env.building.create_request(
                &mut env.agent.rng,
                agent_id,
                RequestKind::Tool {
                    class,
                    min_level,
                    max_level,
                },
                RequestMode::Sync,
                ResolverKind::Retrying,
            );
        }
        return true;
    }
    false
}

/// Async tool procurement: raise the request and keep working. Only one
/// equivalent request per tool class and level band ever exists.
pub fn check_for_tool_async(
    env: &mut TickEnv,
    class: ToolKind,
    min_level: u32,
    max_level: u32,
) {
    if class == ToolKind::None {
        return;
    }
    let agent_id = env.agent.id;
    let open = env
        .building
        .has_open_requests_matching(agent_id, |r| tool_band_matches(r, class, min_level));
    let completed = env
        .building
        .has_completed_requests_matching(agent_id, |r| tool_band_matches(r, class, min_level));
    if open || completed || has_open_tool_request(env, class) {
        return;
    }
    let id = env.building.create_request(
        &mut env.agent.rng,
        agent_id,
        RequestKind::Tool {
            class,
            min_level,
            max_level,
        },
        RequestMode::Async,
        ResolverKind::Retrying,
    );
    env.job.async_requests.insert(id);
}

/// Any open request for this tool class, regardless of level band.
pub fn has_open_tool_request(env: &TickEnv, class: ToolKind) -> bool {
    env.building.has_open_requests_matching(env.agent.id, |r| {
        matches!(r.kind, RequestKind::Tool { class: c, .. } if c == class)
    })
}

/// Cancel all open requests for a tool class (and untrack them from the
/// job). Used when a behavior stops needing a class of equipment.
pub fn cancel_tool_requests(env: &mut TickEnv, class: ToolKind) {
    let ids: Vec<_> = env
        .building
        .open_requests_for(env.agent.id)
        .iter()
        .filter(|r| matches!(r.kind, RequestKind::Tool { class: c, .. } if c == class))
        .map(|r| r.id)
        .collect();
    for id in ids {
        env.building.cancel_request(id);
        env.job.async_requests.remove(&id);
    }
}

/// Do we still need the tool? Checks the inventory first; when lacking,
/// walks home and tries to pull one from hut storage.
fn check_for_needed_tool(
    m: &mut Machine,
    env: &mut TickEnv,
    class: ToolKind,
    min_level: u32,
) -> bool {
    let max_level = env.building.max_tool_level.max(min_level);
    if env.agent.inventory.has_tool(class, min_level, max_level) {
        return false;
    }
    m.add_delay(env.config.delay_recheck);
    crate::worker::walk_to_building(m, env) || !retrieve_tool_from_hut(env, class, min_level)
}

/// Pull a band-matching tool from hut storage into the inventory.
fn retrieve_tool_from_hut(env: &mut TickEnv, class: ToolKind, min_level: u32) -> bool {
    let max_level = env.building.max_tool_level.max(min_level);
    let Some(slot) = env.building.storage.find_first(|s| {
        matches!(s.kind, ItemKind::Tool { kind, level }
            if kind == class && level >= min_level && level <= max_level)
    }) else {
        return false;
    };
    let Some(tool) = env.building.storage.extract(slot, 1) else {
        return false;
    };
    if let Some(leftover) = env.agent.inventory.insert(tool) {
        env.building.storage.insert(leftover);
        return false;
    }
    true
}
