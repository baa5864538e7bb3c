// The workplace building: storage, request ledger, and build progress.
//
// Every agent is assigned to exactly one workplace. The workplace owns:
// - a storage `Inventory` the agent dumps into and draws from;
// - the request ledger for its assigned agents (open / completed /
//   accepted records, see `request.rs`);
// - the persisted build progress `(CellPos, Stage)` pair that lets a build
//   resume mid-structure after a reload;
// - the keep-table consulted while dumping ("how many of this item should
//   the worker keep on hand"), and the surplus-trimming rule that sheds
//   excess stock.
//
// The workplace is data. Behavior hooks (cleanup on pause, restart) live
// on the worker behavior, not here.
//
// See also: `worker.rs` for the dump sub-protocol, `gateway.rs` for
// request creation/dedup, `sim.rs` for ownership and stepping.
//
// **Critical constraint: determinism.** The ledger is a `BTreeMap` keyed
// by `RequestId`; surplus trimming takes the PRNG by parameter.

use crate::config::WorkerConfig;
use crate::cursor::Stage;
use crate::item::{Inventory, ItemKind, ItemStack, ItemStorage};
use crate::prng::GameRng;
use crate::request::{Request, RequestKind, RequestMode, RequestState, ResolverKind};
use crate::types::{AgentId, BuildingId, CellBlock, CellPos, RequestId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The resource kinds the surplus-trimming rule arbitrates between.
const TRIMMED_KINDS: [CellBlock; 5] = [
    CellBlock::Soil,
    CellBlock::Stone,
    CellBlock::Plank,
    CellBlock::Glass,
    CellBlock::Torch,
];

/// An agent's workplace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Building {
    pub id: BuildingId,
    pub position: CellPos,
    pub storage: Inventory,
    pub pickup_priority: u32,
    /// Static-priority buildings never have their priority adjusted by the
    /// dump protocol.
    pub priority_static: bool,
    pub max_tool_level: u32,
    requests: BTreeMap<RequestId, Request>,
    /// Persisted build progress for mid-structure resume.
    progress: Option<(CellPos, Stage)>,
    /// Per-kind counts the assigned worker keeps on hand when dumping.
    keep: Vec<ItemStorage>,
    /// Per-kind stock ceiling enforced by `trim_surplus`.
    pub surplus_limit: u32,
}

impl Building {
    pub fn new(id: BuildingId, position: CellPos, config: &WorkerConfig) -> Self {
        Self {
            id,
            position,
            storage: Inventory::new(config.storage_size),
            pickup_priority: config.normal_pickup_priority,
            priority_static: false,
            max_tool_level: config.max_tool_level,
            requests: BTreeMap::new(),
            progress: None,
            keep: Vec::new(),
            surplus_limit: 128,
        }
    }

    // -- request ledger -----------------------------------------------------

    pub fn create_request(
        &mut self,
        rng: &mut GameRng,
        requester: AgentId,
        kind: RequestKind,
        mode: RequestMode,
        resolver: ResolverKind,
    ) -> RequestId {
        let id = RequestId::new(rng);
        tracing::debug!(request = %kind, ?mode, "created request");
        self.requests.insert(id, Request {
            id,
            requester,
            kind,
            mode,
            resolver,
            state: RequestState::Open,
            deliveries: Vec::new(),
        });
        id
    }

    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    fn requests_for(
        &self,
        agent: AgentId,
        state: RequestState,
    ) -> impl Iterator<Item = &Request> {
        self.requests
            .values()
            .filter(move |r| r.requester == agent && r.state == state)
    }

    pub fn open_requests_for(&self, agent: AgentId) -> Vec<&Request> {
        self.requests_for(agent, RequestState::Open).collect()
    }

    pub fn completed_requests_for(&self, agent: AgentId) -> Vec<&Request> {
        self.requests_for(agent, RequestState::Completed).collect()
    }

    pub fn has_open_requests_for(&self, agent: AgentId) -> bool {
        self.requests_for(agent, RequestState::Open).next().is_some()
    }

    pub fn has_completed_requests_for(&self, agent: AgentId) -> bool {
        self.requests_for(agent, RequestState::Completed)
            .next()
            .is_some()
    }

    pub fn has_open_requests_matching(
        &self,
        agent: AgentId,
        pred: impl Fn(&Request) -> bool,
    ) -> bool {
        self.requests_for(agent, RequestState::Open).any(|r| pred(r))
    }

    pub fn has_completed_requests_matching(
        &self,
        agent: AgentId,
        pred: impl Fn(&Request) -> bool,
    ) -> bool {
        self.requests_for(agent, RequestState::Completed)
            .any(|r| pred(r))
    }

    pub fn mark_request_accepted(&mut self, id: RequestId) {
        if let Some(r) = self.requests.get_mut(&id) {
            r.state = RequestState::Accepted;
        }
    }

    pub fn cancel_request(&mut self, id: RequestId) {
        if let Some(r) = self.requests.get_mut(&id) {
            r.state = RequestState::Cancelled;
        }
    }

    /// Resolver-side entry point: mark a request completed with its
    /// deliveries. The core never calls this for its own requests; the
    /// simulation harness (standing in for the resolver backend) does.
    pub fn complete_request(&mut self, id: RequestId, deliveries: Vec<ItemStack>) {
        if let Some(r) = self.requests.get_mut(&id) {
            r.state = RequestState::Completed;
            r.deliveries = deliveries;
        }
    }

    // -- build progress -----------------------------------------------------

    pub fn progress(&self) -> Option<(CellPos, Stage)> {
        self.progress
    }

    pub fn set_progress(&mut self, pos: CellPos, stage: Stage) {
        self.progress = Some((pos, stage));
    }

    pub fn clear_progress(&mut self) {
        self.progress = None;
    }

    // -- pickup priority ----------------------------------------------------

    pub fn alter_pickup_priority(&mut self, priority: u32) {
        self.pickup_priority = priority;
    }

    // -- dump policy ---------------------------------------------------------

    /// Declare that the assigned worker should keep `amount` of `kind` on
    /// hand across inventory dumps.
    pub fn set_keep(&mut self, kind: ItemKind, amount: u32) {
        match self.keep.iter_mut().find(|s| s.kind == kind) {
            Some(entry) => entry.amount = amount,
            None => self.keep.push(ItemStorage::new(kind, amount)),
        }
    }

    /// How much of `stack` may be dumped into storage right now.
    ///
    /// Consults the keep-table and the `already_kept` tally the dump cycle
    /// threads through its slots, so the worker retains at most the
    /// configured amount across the whole cycle rather than per slot.
    pub fn dumpable_amount(
        &self,
        stack: &ItemStack,
        already_kept: &mut Vec<ItemStorage>,
    ) -> u32 {
        let limit = self
            .keep
            .iter()
            .find(|s| s.kind == stack.kind)
            .map_or(0, |s| s.amount);
        if limit == 0 {
            return stack.count;
        }
        let kept_so_far = already_kept
            .iter()
            .find(|s| s.kind == stack.kind)
            .map_or(0, |s| s.amount);
        let to_keep = limit.saturating_sub(kept_so_far).min(stack.count);
        if to_keep > 0 {
            match already_kept.iter_mut().find(|s| s.kind == stack.kind) {
                Some(s) => s.amount += to_keep,
                None => already_kept.push(ItemStorage::new(stack.kind, to_keep)),
            }
        }
        stack.count - to_keep
    }

    // -- surplus trimming ----------------------------------------------------

    /// Shed stock above `surplus_limit`, removing one stack at a time from
    /// a randomly chosen over-limit kind. The tie-break between kinds is an
    /// explicit draw from the passed PRNG so replays and tests can pin it.
    pub fn trim_surplus(&mut self, rng: &mut GameRng) {
        loop {
            let over: Vec<CellBlock> = TRIMMED_KINDS
                .iter()
                .copied()
                .filter(|&b| {
                    self.storage
                        .count_matching(|s| s.kind == ItemKind::Block(b))
                        > self.surplus_limit
                })
                .collect();
            if over.is_empty() {
                return;
            }
            let kind = ItemKind::Block(over[rng.pick_index(over.len())]);
            let Some(slot) = self.storage.find_first(|s| s.kind == kind) else {
                return;
            };
            self.storage.extract(slot, u32::MAX);
        }
    }
}
