// Placement handlers: how a target cell state actually gets into the
// world.
//
// The construction engine never writes structural cells directly. It asks
// an ordered registry of handlers; the first handler that claims the
// target cell runs, and its result is a tagged variant the engine matches
// on:
//
// - `Accept`   — placed, nothing to pay (free materials).
// - `Deny`     — cannot be placed here; the cell stays blocked.
// - `Placed`   — placed; the engine pays the item cost and side effects.
// - `Consumed` — placed by working an item (a hoe tilling soil); the
//                engine drains/damages the matching inventory slot.
//
// The registry is an explicit, immutable, ordered collection constructed
// once at startup and passed by reference through the tick environment —
// never module-level mutable state. Order matters: earlier handlers win,
// so the specific ones (water, tilled soil, fixtures) sit in front of the
// general solid-block handler.
//
// A target no handler claims is logged and treated as handled by the
// caller — see `construction.rs`.

use crate::item::{ItemKind, ItemStack, item_for_cell};
use crate::types::{CellBlock, CellPos, CellState, ToolKind};
use crate::world::CellWorld;
use smallvec::SmallVec;

/// Outcome of one placement attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlacementResult {
    Accept,
    Deny,
    Placed(CellState),
    Consumed(ItemStack),
}

/// One entry in the placement registry.
pub trait PlacementHandler {
    /// Whether this handler knows how to place the target cell state.
    fn can_handle(&self, world: &CellWorld, pos: CellPos, target: CellState) -> bool;

    /// Items the placement consumes. Empty for free placements.
    fn required_items(&self, target: CellState) -> SmallVec<[ItemStack; 2]>;

    /// Perform the placement.
    fn handle(&self, world: &mut CellWorld, pos: CellPos, target: CellState) -> PlacementResult;
}

/// Ordered, immutable collection of placement handlers.
pub struct PlacementRegistry {
    handlers: Vec<Box<dyn PlacementHandler>>,
}

impl Default for PlacementRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl PlacementRegistry {
    pub fn new(handlers: Vec<Box<dyn PlacementHandler>>) -> Self {
        Self { handlers }
    }

    /// The standard handler set, most specific first.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(AirHandler),
            Box::new(WaterHandler),
            Box::new(TilledSoilHandler),
            Box::new(FixtureHandler),
            Box::new(SolidBlockHandler),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn PlacementHandler> {
        self.handlers.iter().map(|h| h.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Standard handlers
// ---------------------------------------------------------------------------

/// Blueprint air: the cell just has to be empty.
struct AirHandler;

impl PlacementHandler for AirHandler {
    fn can_handle(&self, _world: &CellWorld, _pos: CellPos, target: CellState) -> bool {
        target.block == CellBlock::Air
    }

    fn required_items(&self, _target: CellState) -> SmallVec<[ItemStack; 2]> {
        SmallVec::new()
    }

    fn handle(&self, world: &mut CellWorld, pos: CellPos, _target: CellState) -> PlacementResult {
        world.set(pos, CellState::AIR);
        PlacementResult::Accept
    }
}

/// Water flows in for free.
struct WaterHandler;

impl PlacementHandler for WaterHandler {
    fn can_handle(&self, _world: &CellWorld, _pos: CellPos, target: CellState) -> bool {
        target.block == CellBlock::Water
    }

    fn required_items(&self, _target: CellState) -> SmallVec<[ItemStack; 2]> {
        SmallVec::new()
    }

    fn handle(&self, world: &mut CellWorld, pos: CellPos, target: CellState) -> PlacementResult {
        world.set(pos, target);
        PlacementResult::Accept
    }
}

/// Tilled soil is worked, not placed: soil goes in, the hoe takes the
/// wear. Reports the consumed hoe so the engine damages the held one.
struct TilledSoilHandler;

impl PlacementHandler for TilledSoilHandler {
    fn can_handle(&self, _world: &CellWorld, _pos: CellPos, target: CellState) -> bool {
        target.block == CellBlock::TilledSoil
    }

    fn required_items(&self, _target: CellState) -> SmallVec<[ItemStack; 2]> {
        let mut items = SmallVec::new();
        items.push(ItemStack::new(ItemKind::Block(CellBlock::Soil), 1));
        items
    }

    fn handle(&self, world: &mut CellWorld, pos: CellPos, target: CellState) -> PlacementResult {
        world.set(pos, target);
        PlacementResult::Consumed(ItemStack::tool(ToolKind::Hoe, 0))
    }
}

/// Attachable non-solid cells: torches, ladders, leaves. Need something
/// solid to hang off.
struct FixtureHandler;

impl PlacementHandler for FixtureHandler {
    fn can_handle(&self, _world: &CellWorld, _pos: CellPos, target: CellState) -> bool {
        matches!(
            target.block,
            CellBlock::Torch | CellBlock::Ladder | CellBlock::Leaves
        )
    }

    fn required_items(&self, target: CellState) -> SmallVec<[ItemStack; 2]> {
        let mut items = SmallVec::new();
        if let Some(stack) = item_for_cell(target) {
            items.push(stack);
        }
        items
    }

    fn handle(&self, world: &mut CellWorld, pos: CellPos, target: CellState) -> PlacementResult {
        if !world.has_solid_face_neighbor(pos) {
            return PlacementResult::Deny;
        }
        world.set(pos, target);
        PlacementResult::Placed(target)
    }
}

/// The general case: any craftable solid block.
struct SolidBlockHandler;

impl PlacementHandler for SolidBlockHandler {
    fn can_handle(&self, _world: &CellWorld, _pos: CellPos, target: CellState) -> bool {
        // Bedrock is solid but cannot be produced; leave it unclaimed.
        target.block.is_solid() && !target.block.is_protected()
    }

    fn required_items(&self, target: CellState) -> SmallVec<[ItemStack; 2]> {
        let mut items = SmallVec::new();
        if let Some(stack) = item_for_cell(target) {
            items.push(stack);
        }
        items
    }

    fn handle(&self, world: &mut CellWorld, pos: CellPos, target: CellState) -> PlacementResult {
        world.set(pos, target);
        PlacementResult::Placed(target)
    }
}
