// Items, stacks, and the bounded slot inventory agents and workplaces carry.
//
// Three layers:
// - `ItemKind`: identity — a placeable block material or a leveled tool.
// - `ItemStack`: kind + count + durability. The unit of transfer.
// - `ItemStorage`: kind + amount with equality *by kind only*. Used to
//   aggregate and deduplicate outstanding material needs — two storages for
//   the same kind are the same need regardless of amount.
//
// `Inventory` is a bounded indexed slot collection (fixed size, `Option`
// per slot). Insertion is first-fit with stacking; extraction is per-slot.
// Workplace storage and agent inventories are both `Inventory`, only sized
// differently.
//
// See also: `types.rs` for `CellBlock`/`ToolKind`, `world.rs` for cell
// drops, `building.rs` for the dump policy that consumes `ItemStorage`.

use crate::types::{CellBlock, CellState, ToolKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Most block items stack to this count.
pub const MAX_STACK: u32 = 64;

/// Fresh tool durability.
pub const TOOL_DURABILITY: u32 = 128;

// ---------------------------------------------------------------------------
// Item identity
// ---------------------------------------------------------------------------

/// Identity of an item: either a placeable block material or a leveled tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemKind {
    Block(CellBlock),
    Tool { kind: ToolKind, level: u32 },
}

impl ItemKind {
    pub fn is_tool(self) -> bool {
        matches!(self, ItemKind::Tool { .. })
    }

    /// Items stack to `MAX_STACK`; tools do not stack.
    pub fn max_stack(self) -> u32 {
        if self.is_tool() { 1 } else { MAX_STACK }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Block(b) => write!(f, "{b:?}"),
            ItemKind::Tool { kind, level } => write!(f, "{kind:?} (level {level})"),
        }
    }
}

/// The item an agent must hold to place the given cell, or `None` for cells
/// that need no item at all (air, flowing water).
pub fn item_for_cell(state: CellState) -> Option<ItemStack> {
    match state.block {
        CellBlock::Air | CellBlock::Water => None,
        // A tilled cell is placed by working soil, not by a dedicated item.
        CellBlock::TilledSoil => Some(ItemStack::new(ItemKind::Block(CellBlock::Soil), 1)),
        b => Some(ItemStack::new(ItemKind::Block(b), 1)),
    }
}

// ---------------------------------------------------------------------------
// Stacks
// ---------------------------------------------------------------------------

/// A stack of identical items. `durability` is meaningful for tools only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub kind: ItemKind,
    pub count: u32,
    pub durability: u32,
}

impl ItemStack {
    pub fn new(kind: ItemKind, count: u32) -> Self {
        Self {
            kind,
            count,
            durability: 0,
        }
    }

    pub fn tool(kind: ToolKind, level: u32) -> Self {
        Self {
            kind: ItemKind::Tool { kind, level },
            count: 1,
            durability: TOOL_DURABILITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Same identity, count ignored.
    pub fn same_kind(&self, other: &ItemStack) -> bool {
        self.kind == other.kind
    }

    /// Apply wear. Returns `true` if the item broke.
    pub fn damage(&mut self, amount: u32) -> bool {
        self.durability = self.durability.saturating_sub(amount);
        self.kind.is_tool() && self.durability == 0
    }
}

// ---------------------------------------------------------------------------
// Storage records — equality by kind
// ---------------------------------------------------------------------------

/// An item requirement: kind + amount, compared and hashed by kind only.
///
/// Aggregation key for outstanding material needs: inserting two records of
/// the same kind into a map collapses them into one entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ItemStorage {
    pub kind: ItemKind,
    pub amount: u32,
}

impl ItemStorage {
    pub fn new(kind: ItemKind, amount: u32) -> Self {
        Self { kind, amount }
    }

    pub fn of_stack(stack: &ItemStack) -> Self {
        Self {
            kind: stack.kind,
            amount: stack.count,
        }
    }
}

impl PartialEq for ItemStorage {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for ItemStorage {}

impl Hash for ItemStorage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl PartialOrd for ItemStorage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemStorage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind.cmp(&other.kind)
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A bounded, indexed slot collection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Inventory {
    slots: Vec<Option<ItemStack>>,
}

impl Inventory {
    pub fn new(size: u32) -> Self {
        Self {
            slots: vec![None; size as usize],
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, slot: usize) -> Option<&ItemStack> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    pub fn set(&mut self, slot: usize, stack: Option<ItemStack>) {
        if slot < self.slots.len() {
            self.slots[slot] = stack;
        }
    }

    /// Remove up to `amount` items from a slot. Returns what was removed,
    /// or `None` for an empty / out-of-range slot.
    pub fn extract(&mut self, slot: usize, amount: u32) -> Option<ItemStack> {
        let entry = self.slots.get_mut(slot)?;
        let stack = entry.as_mut()?;
        let taken = amount.min(stack.count);
        if taken == 0 {
            return None;
        }
        let mut out = *stack;
        out.count = taken;
        stack.count -= taken;
        if stack.count == 0 {
            *entry = None;
        }
        Some(out)
    }

    /// Insert a stack, merging into same-kind slots first, then filling
    /// empty slots. Returns the leftover that did not fit.
    pub fn insert(&mut self, stack: ItemStack) -> Option<ItemStack> {
        if stack.is_empty() {
            return None;
        }
        let mut remaining = stack;
        let cap = stack.kind.max_stack();

        // Merge pass.
        for slot in self.slots.iter_mut() {
            if remaining.count == 0 {
                break;
            }
            if let Some(existing) = slot
                && existing.kind == remaining.kind
                && existing.count < cap
            {
                let take = (cap - existing.count).min(remaining.count);
                existing.count += take;
                remaining.count -= take;
            }
        }

        // Empty-slot pass.
        for slot in self.slots.iter_mut() {
            if remaining.count == 0 {
                break;
            }
            if slot.is_none() {
                let take = cap.min(remaining.count);
                let mut placed = remaining;
                placed.count = take;
                *slot = Some(placed);
                remaining.count -= take;
            }
        }

        (remaining.count > 0).then_some(remaining)
    }

    /// An inventory is full when it has no open slot left.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    pub fn open_slot_count(&self) -> u32 {
        self.slots.iter().filter(|s| s.is_none()).count() as u32
    }

    /// First occupied slot matching the predicate.
    pub fn find_first(&self, pred: impl Fn(&ItemStack) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(&pred))
    }

    pub fn has_matching(&self, pred: impl Fn(&ItemStack) -> bool) -> bool {
        self.find_first(pred).is_some()
    }

    /// Total item count across all slots matching the predicate.
    pub fn count_matching(&self, pred: impl Fn(&ItemStack) -> bool) -> u32 {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .filter(|s| pred(s))
            .map(|s| s.count)
            .sum()
    }

    /// Occupied slots, in index order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &ItemStack)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|stack| (i, stack)))
    }

    /// Whether a tool of the given class with level in `[min_level,
    /// max_level]` is present.
    pub fn has_tool(&self, class: ToolKind, min_level: u32, max_level: u32) -> bool {
        self.has_matching(|s| {
            matches!(s.kind, ItemKind::Tool { kind, level }
                if kind == class && level >= min_level && level <= max_level)
        })
    }

    /// Slot of the most efficient usable tool for harvesting `block`: the
    /// lowest-level tool of the right class with `level >= required` and
    /// `level <= max_level`. Cells needing no tool return `None` — callers
    /// treat that as "bare hands are fine".
    pub fn most_efficient_tool(&self, block: CellBlock, max_level: u32) -> Option<usize> {
        let class = ToolKind::best_for(block);
        if class == ToolKind::None {
            return None;
        }
        let required = ToolKind::required_level(block);
        let mut best: Option<(usize, u32)> = None;
        for (i, stack) in self.occupied() {
            if let ItemKind::Tool { kind, level } = stack.kind
                && kind == class
                && level >= required
                && level <= max_level
                && best.is_none_or(|(_, b)| level < b)
            {
                best = Some((i, level));
            }
        }
        best.map(|(i, _)| i)
    }
}
