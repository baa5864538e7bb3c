// Dense 3D cell grid for the shared world.
//
// The grid is stored as a flat `Vec<CellState>` indexed by
// `x + z * size_x + y * size_x * size_z`, giving O(1) read/write access.
// Out-of-bounds reads return `Air`; out-of-bounds writes are no-ops.
// Repeated reads are idempotent — nothing in here mutates on read.
//
// On top of the grid sit two overlays the construction engine needs:
// - loose items: stacks lying on the ground (scattered drops, residuals
//   around a finished build), indexed by position for O(1) probing;
// - placed spawns: structure objects (stands, lanterns) placed by the
//   spawn pass, so an equivalent object is never spawned twice.
//
// See also: `types.rs` for `CellPos`/`CellState`, `structure.rs` for the
// blueprints whose cells are written here, `construction.rs` for the
// engine doing the writing.
//
// **Critical constraint: determinism.** The loose-item overlay uses
// `FxHashMap` for point lookups only — every enumeration goes through
// `loose_positions_in`, which scans coordinates in ascending order.

use crate::item::ItemStack;
use crate::structure::PlacedSpawn;
use crate::types::{CellBlock, CellPos, CellState};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// What mining a cell of the given material yields.
pub fn drops_for(block: CellBlock) -> SmallVec<[ItemStack; 2]> {
    use crate::item::ItemKind;
    let mut out = SmallVec::new();
    match block {
        CellBlock::Soil | CellBlock::TilledSoil => {
            out.push(ItemStack::new(ItemKind::Block(CellBlock::Soil), 1));
        }
        CellBlock::Stone => out.push(ItemStack::new(ItemKind::Block(CellBlock::Stone), 1)),
        CellBlock::Plank => out.push(ItemStack::new(ItemKind::Block(CellBlock::Plank), 1)),
        CellBlock::Torch => out.push(ItemStack::new(ItemKind::Block(CellBlock::Torch), 1)),
        CellBlock::Ladder => out.push(ItemStack::new(ItemKind::Block(CellBlock::Ladder), 1)),
        // Glass shatters, leaves crumble, fluids and air yield nothing.
        _ => {}
    }
    out
}

/// Dense 3D cell grid plus the loose-item and spawn overlays.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CellWorld {
    /// Flat storage: index = x + z * size_x + y * size_x * size_z.
    cells: Vec<CellState>,
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    /// Stacks lying on the ground. Point lookups only — see module header.
    /// Transient: loose items despawn across a save/load.
    #[serde(skip)]
    loose: FxHashMap<CellPos, ItemStack>,
    /// Structure objects placed by the spawn pass. A flat list — spawns
    /// stay rare enough that linear scans beat a keyed map with custom
    /// key serialization.
    spawns: Vec<PlacedSpawn>,
}

impl CellWorld {
    /// Create a new world filled with `Air`.
    pub fn new(size_x: u32, size_y: u32, size_z: u32) -> Self {
        let total = (size_x as usize) * (size_y as usize) * (size_z as usize);
        Self {
            cells: vec![CellState::AIR; total],
            size_x,
            size_y,
            size_z,
            loose: FxHashMap::default(),
            spawns: Vec::new(),
        }
    }

    pub fn in_bounds(&self, pos: CellPos) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && pos.z >= 0
            && (pos.x as u32) < self.size_x
            && (pos.y as u32) < self.size_y
            && (pos.z as u32) < self.size_z
    }

    fn index(&self, pos: CellPos) -> Option<usize> {
        if self.in_bounds(pos) {
            let x = pos.x as usize;
            let y = pos.y as usize;
            let z = pos.z as usize;
            let sx = self.size_x as usize;
            let sz = self.size_z as usize;
            Some(x + z * sx + y * sx * sz)
        } else {
            None
        }
    }

    /// Read a cell. Returns `Air` for out-of-bounds positions.
    pub fn get(&self, pos: CellPos) -> CellState {
        self.index(pos)
            .map(|i| self.cells[i])
            .unwrap_or(CellState::AIR)
    }

    /// Write a cell. No-op for out-of-bounds positions.
    pub fn set(&mut self, pos: CellPos, state: CellState) {
        if let Some(i) = self.index(pos) {
            self.cells[i] = state;
        }
    }

    /// What mining the cell at `pos` would yield right now.
    pub fn drops_of(&self, pos: CellPos) -> SmallVec<[ItemStack; 2]> {
        drops_for(self.get(pos).block)
    }

    /// Returns `true` if any of the 6 face-adjacent cells (±x, ±y, ±z) is solid.
    ///
    /// Out-of-bounds neighbors read as Air, so boundary positions need no
    /// special cases.
    pub fn has_solid_face_neighbor(&self, pos: CellPos) -> bool {
        const FACE_OFFSETS: [(i32, i32, i32); 6] = [
            (1, 0, 0),
            (-1, 0, 0),
            (0, 1, 0),
            (0, -1, 0),
            (0, 0, 1),
            (0, 0, -1),
        ];
        FACE_OFFSETS.iter().any(|&(dx, dy, dz)| {
            self.get(pos.offset(dx, dy, dz)).block.is_solid()
        })
    }

    /// A standing spot: air at `pos` and above it, solid ground below.
    pub fn has_free_headroom(&self, pos: CellPos) -> bool {
        self.get(pos).is_air()
            && self.get(pos.offset(0, 1, 0)).is_air()
            && self.get(pos.offset(0, -1, 0)).block.is_solid()
    }

    /// Drop a column from `pos` to the highest standing spot at or below it.
    /// Returns `pos` unchanged if no floor exists in bounds.
    pub fn find_floor(&self, mut pos: CellPos) -> CellPos {
        while pos.y > 0 && !self.get(pos.offset(0, -1, 0)).block.is_solid() {
            pos = pos.offset(0, -1, 0);
        }
        pos
    }

    // -- loose items --------------------------------------------------------

    /// Drop a stack on the ground at `pos`, merging with whatever lies there.
    pub fn scatter_item(&mut self, pos: CellPos, stack: ItemStack) {
        if stack.is_empty() {
            return;
        }
        self.loose
            .entry(pos)
            .and_modify(|s| {
                if s.kind == stack.kind {
                    s.count += stack.count;
                }
            })
            .or_insert(stack);
    }

    /// Pick up the stack lying at `pos`, if any.
    pub fn take_loose_item(&mut self, pos: CellPos) -> Option<ItemStack> {
        self.loose.remove(&pos)
    }

    pub fn loose_item_at(&self, pos: CellPos) -> Option<&ItemStack> {
        self.loose.get(&pos)
    }

    /// Positions inside the inclusive box `[min, max]` holding loose items,
    /// in ascending (y, z, x) order.
    pub fn loose_positions_in(&self, min: CellPos, max: CellPos) -> Vec<CellPos> {
        let mut out = Vec::new();
        for y in min.y..=max.y {
            for z in min.z..=max.z {
                for x in min.x..=max.x {
                    let pos = CellPos::new(x, y, z);
                    if self.loose.contains_key(&pos) {
                        out.push(pos);
                    }
                }
            }
        }
        out
    }

    // -- placed spawns ------------------------------------------------------

    /// Whether an equivalent spawn (same kind) already exists at `pos`.
    pub fn spawn_exists(&self, pos: CellPos, kind: crate::structure::SpawnKind) -> bool {
        self.spawns.iter().any(|s| s.pos == pos && s.kind == kind)
    }

    /// Place a spawn into the world. Rejected (returns `false`) when the
    /// target cell is solid — a stand cannot occupy a wall.
    pub fn place_spawn(&mut self, spawn: PlacedSpawn) -> bool {
        if self.get(spawn.pos).block.is_solid() {
            return false;
        }
        self.spawns.push(spawn);
        true
    }

    pub fn spawns_at(&self, pos: CellPos) -> impl Iterator<Item = &PlacedSpawn> {
        self.spawns.iter().filter(move |s| s.pos == pos)
    }
}
