// Material and tool requests — the records behind the pull-based resource
// protocol.
//
// Workers never fetch materials themselves from across the colony: they
// record a request against their workplace and keep working (or waiting)
// until an external resolver completes it. The core only creates requests,
// deduplicates them, and consumes completed deliveries; how a request gets
// fulfilled is someone else's problem (the resolver backend is outside
// this crate).
//
// A request's lifecycle is Open → Completed → Accepted, or Cancelled from
// any live state. Sync requests stall the worker (it sits in NEEDS_ITEM
// until delivery); async requests are tracked on the `Job` and picked up
// opportunistically.
//
// See also: `building.rs` for the ledger that stores these, `gateway.rs`
// for the create/dedup logic, `worker.rs` for the waiting loop.

use crate::item::{ItemStack, ItemStorage};
use crate::types::{AgentId, RequestId, ToolKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the requesting worker stalls on this request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMode {
    Sync,
    Async,
}

/// Which backend is expected to resolve a request. Player and Retrying
/// resolvers surface interactive prompts while open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolverKind {
    Warehouse,
    Player,
    Retrying,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Open,
    Completed,
    Accepted,
    Cancelled,
}

/// What is being asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// A quantity of one item kind.
    Stack(ItemStorage),
    /// Any tool of the class within the level band.
    Tool {
        class: ToolKind,
        min_level: u32,
        max_level: u32,
    },
}

impl RequestKind {
    /// Whether a delivered stack satisfies this request.
    pub fn matches(&self, stack: &ItemStack) -> bool {
        match self {
            RequestKind::Stack(storage) => storage.kind == stack.kind,
            RequestKind::Tool {
                class,
                min_level,
                max_level,
            } => matches!(stack.kind, crate::item::ItemKind::Tool { kind, level }
                if kind == *class && level >= *min_level && level <= *max_level),
        }
    }

    /// Whether two asks target the same need (same item kind, or same tool
    /// class with overlapping level bands). Used to suppress duplicates.
    pub fn equivalent(&self, other: &RequestKind) -> bool {
        match (self, other) {
            (RequestKind::Stack(a), RequestKind::Stack(b)) => a.kind == b.kind,
            (
                RequestKind::Tool {
                    class: a,
                    min_level: a_min,
                    max_level: a_max,
                },
                RequestKind::Tool {
                    class: b,
                    min_level: b_min,
                    max_level: b_max,
                },
            ) => a == b && a_min <= b_max && b_min <= a_max,
            _ => false,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Stack(s) => write!(f, "{} x{}", s.kind, s.amount),
            RequestKind::Tool {
                class,
                min_level,
                max_level,
            } => write!(f, "{class:?} (level {min_level}..={max_level})"),
        }
    }
}

/// One request in a workplace's ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub requester: AgentId,
    pub kind: RequestKind,
    pub mode: RequestMode,
    pub resolver: ResolverKind,
    pub state: RequestState,
    /// Stacks supplied by the resolver; filled when the state moves to
    /// `Completed`.
    pub deliveries: Vec<ItemStack>,
}

impl Request {
    /// A completed request with at least one delivered stack can be handed
    /// to the worker.
    pub fn can_be_delivered(&self) -> bool {
        self.state == RequestState::Completed && !self.deliveries.is_empty()
    }

    /// Human-readable summary for status lines and prompts.
    pub fn short_display(&self) -> String {
        self.kind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;
    use crate::prng::GameRng;
    use crate::types::CellBlock;

    fn plank_storage(amount: u32) -> ItemStorage {
        ItemStorage::new(ItemKind::Block(CellBlock::Plank), amount)
    }

    #[test]
    fn stack_request_matches_by_kind() {
        let kind = RequestKind::Stack(plank_storage(3));
        assert!(kind.matches(&ItemStack::new(ItemKind::Block(CellBlock::Plank), 1)));
        assert!(!kind.matches(&ItemStack::new(ItemKind::Block(CellBlock::Stone), 3)));
    }

    #[test]
    fn tool_request_matches_level_band() {
        let kind = RequestKind::Tool {
            class: ToolKind::Pickaxe,
            min_level: 1,
            max_level: 2,
        };
        assert!(kind.matches(&ItemStack::tool(ToolKind::Pickaxe, 1)));
        assert!(kind.matches(&ItemStack::tool(ToolKind::Pickaxe, 2)));
        assert!(!kind.matches(&ItemStack::tool(ToolKind::Pickaxe, 0)));
        assert!(!kind.matches(&ItemStack::tool(ToolKind::Axe, 1)));
    }

    #[test]
    fn equivalence_dedupes_same_need() {
        let a = RequestKind::Stack(plank_storage(3));
        let b = RequestKind::Stack(plank_storage(99));
        assert!(a.equivalent(&b));

        let t1 = RequestKind::Tool {
            class: ToolKind::Pickaxe,
            min_level: 0,
            max_level: 2,
        };
        let t2 = RequestKind::Tool {
            class: ToolKind::Pickaxe,
            min_level: 2,
            max_level: 3,
        };
        let t3 = RequestKind::Tool {
            class: ToolKind::Pickaxe,
            min_level: 3,
            max_level: 3,
        };
        assert!(t1.equivalent(&t2), "overlapping bands are the same need");
        assert!(!t1.equivalent(&t3), "disjoint bands are different needs");
        assert!(!a.equivalent(&t1));
    }

    #[test]
    fn delivery_gate() {
        let mut rng = GameRng::new(42);
        let mut request = Request {
            id: RequestId::new(&mut rng),
            requester: AgentId::new(&mut rng),
            kind: RequestKind::Stack(plank_storage(3)),
            mode: RequestMode::Sync,
            resolver: ResolverKind::Warehouse,
            state: RequestState::Open,
            deliveries: Vec::new(),
        };
        assert!(!request.can_be_delivered());
        request.state = RequestState::Completed;
        assert!(!request.can_be_delivered(), "no stacks delivered yet");
        request
            .deliveries
            .push(ItemStack::new(ItemKind::Block(CellBlock::Plank), 3));
        assert!(request.can_be_delivered());
    }

    #[test]
    fn request_serialization_roundtrip() {
        let mut rng = GameRng::new(7);
        let request = Request {
            id: RequestId::new(&mut rng),
            requester: AgentId::new(&mut rng),
            kind: RequestKind::Tool {
                class: ToolKind::Axe,
                min_level: 0,
                max_level: 2,
            },
            mode: RequestMode::Async,
            resolver: ResolverKind::Retrying,
            state: RequestState::Open,
            deliveries: Vec::new(),
        };
        let json = serde_json::to_string(&request).unwrap();
        let restored: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, request.id);
        assert_eq!(restored.mode, RequestMode::Async);
        assert!(restored.kind.equivalent(&request.kind));
    }
}
