// Structure blueprints and the blueprint store.
//
// A `Blueprint` is the stored, orientation-neutral description of a
// multi-cell structure: dimensions plus per-cell content (target cell
// state and any spawnable objects). `StructureStore::load` resolves a
// blueprint by name and bakes in placement: world anchor, rotation
// (quarter turns around Y) and mirroring are applied up front, producing
// an immutable `Structure` the construction engine walks cell by cell.
//
// A `Structure` is owned by the agent's `Job` for the duration of a build
// and discarded on completion or cancellation. The cursor that walks it
// lives in the engine (`cursor.rs`), not here.
//
// Load failures are the one place this module returns a real error:
// missing names and malformed cell grids both cancel the build (see the
// "no structure" path in `construction.rs`).
//
// See also: `cursor.rs` for stage-ordered traversal, `world.rs` for the
// grid the structure is written into, `types.rs` for `CellState`.

use crate::item::{ItemKind, ItemStack};
use crate::types::{CellBlock, CellPos, CellState, SpawnId};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::BTreeMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Spawnable objects
// ---------------------------------------------------------------------------

/// Kinds of structure objects placed by the spawn pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpawnKind {
    /// A display stand.
    Stand,
    /// A hanging lantern.
    Lantern,
}

/// A spawnable object recorded at a blueprint cell, with the items it is
/// assembled from. Each placement consumes one of each constituent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spawnable {
    pub kind: SpawnKind,
    pub constituents: SmallVec<[ItemStack; 2]>,
}

impl Spawnable {
    pub fn stand() -> Self {
        Self {
            kind: SpawnKind::Stand,
            constituents: smallvec![ItemStack::new(ItemKind::Block(CellBlock::Plank), 1)],
        }
    }

    pub fn lantern() -> Self {
        Self {
            kind: SpawnKind::Lantern,
            constituents: smallvec![
                ItemStack::new(ItemKind::Block(CellBlock::Torch), 1),
                ItemStack::new(ItemKind::Block(CellBlock::Glass), 1),
            ],
        }
    }
}

/// A spawnable that has been assembled and placed into the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedSpawn {
    pub id: SpawnId,
    pub kind: SpawnKind,
    pub pos: CellPos,
}

// ---------------------------------------------------------------------------
// Blueprint cells
// ---------------------------------------------------------------------------

/// One cell of a blueprint: optional target content plus spawnables.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureCell {
    /// The cell state the finished structure has here. `None` means the
    /// blueprint says nothing about this cell (don't clear, don't build).
    pub content: Option<CellState>,
    /// Objects to assemble and place here during the spawn pass.
    pub spawnables: SmallVec<[Spawnable; 1]>,
}

impl StructureCell {
    /// A cell with no placement data at all.
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.spawnables.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Blueprints (stored, orientation-neutral)
// ---------------------------------------------------------------------------

/// Orientation-neutral structure description as kept in the store.
///
/// Cells are flat-indexed `x + z * width + y * width * length`, the same
/// scheme the world grid uses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Blueprint {
    pub width: u32,
    pub height: u32,
    pub length: u32,
    pub cells: Vec<StructureCell>,
}

impl Blueprint {
    /// An all-empty blueprint of the given dimensions.
    pub fn empty(width: u32, height: u32, length: u32) -> Self {
        let total = (width * height * length) as usize;
        Self {
            width,
            height,
            length,
            cells: vec![StructureCell::default(); total],
        }
    }

    fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (x + z * self.width + y * self.width * self.length) as usize
    }

    pub fn set_content(&mut self, x: u32, y: u32, z: u32, state: CellState) {
        let i = self.index(x, y, z);
        self.cells[i].content = Some(state);
    }

    pub fn add_spawnable(&mut self, x: u32, y: u32, z: u32, spawnable: Spawnable) {
        let i = self.index(x, y, z);
        self.cells[i].spawnables.push(spawnable);
    }

    fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.length > 0
            && self.cells.len() == (self.width * self.height * self.length) as usize
    }
}

// ---------------------------------------------------------------------------
// Loaded structures (anchored, rotated)
// ---------------------------------------------------------------------------

/// An immutable blueprint instance bound to a world position, with rotation
/// and mirroring already applied to the cell grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Structure {
    pub name: String,
    /// World position of the structure's minimum corner.
    pub anchor: CellPos,
    pub width: u32,
    pub height: u32,
    pub length: u32,
    /// Quarter turns around Y applied at load.
    pub rotation: u8,
    pub mirrored: bool,
    cells: Vec<StructureCell>,
}

impl Structure {
    fn index(&self, local: CellPos) -> usize {
        (local.x as u32
            + local.z as u32 * self.width
            + local.y as u32 * self.width * self.length) as usize
    }

    pub fn in_bounds(&self, local: CellPos) -> bool {
        local.x >= 0
            && local.y >= 0
            && local.z >= 0
            && (local.x as u32) < self.width
            && (local.y as u32) < self.height
            && (local.z as u32) < self.length
    }

    pub fn cell(&self, local: CellPos) -> &StructureCell {
        &self.cells[self.index(local)]
    }

    pub fn local_to_world(&self, local: CellPos) -> CellPos {
        self.anchor.offset(local.x, local.y, local.z)
    }

    pub fn center(&self) -> CellPos {
        self.anchor.offset(
            self.width as i32 / 2,
            self.height as i32 / 2,
            self.length as i32 / 2,
        )
    }

    /// Inclusive world-space bounding box of the structure itself.
    pub fn bounds(&self) -> (CellPos, CellPos) {
        (
            self.anchor,
            self.anchor.offset(
                self.width as i32 - 1,
                self.height as i32 - 1,
                self.length as i32 - 1,
            ),
        )
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Errors surfaced when resolving a blueprint by name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("no blueprint named {name:?} in the store")]
    NotFound { name: String },
    #[error("blueprint {name:?} is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

/// Named blueprint registry. Loading applies anchor, rotation, and mirror.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructureStore {
    blueprints: BTreeMap<String, Blueprint>,
}

impl StructureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, blueprint: Blueprint) {
        self.blueprints.insert(name.into(), blueprint);
    }

    /// Resolve a blueprint and bake in placement. `rotation` counts quarter
    /// turns around Y; mirroring flips X before rotating.
    pub fn load(
        &self,
        name: &str,
        anchor: CellPos,
        rotation: u8,
        mirrored: bool,
    ) -> Result<Structure, StructureError> {
        let bp = self
            .blueprints
            .get(name)
            .ok_or_else(|| StructureError::NotFound {
                name: name.to_string(),
            })?;
        if !bp.is_well_formed() {
            return Err(StructureError::Malformed {
                name: name.to_string(),
                reason: format!(
                    "cell count {} does not match {}x{}x{}",
                    bp.cells.len(),
                    bp.width,
                    bp.height,
                    bp.length
                ),
            });
        }

        let rotation = rotation % 4;
        let (w, l) = (bp.width, bp.length);
        // Odd quarter turns swap the footprint axes.
        let (out_w, out_l) = if rotation % 2 == 1 { (l, w) } else { (w, l) };

        let mut cells =
            vec![StructureCell::default(); (out_w * bp.height * out_l) as usize];
        for y in 0..bp.height {
            for z in 0..l {
                for x in 0..w {
                    let src = bp.cells[bp.index(x, y, z)].clone();
                    let mx = if mirrored { w - 1 - x } else { x };
                    let (nx, nz) = match rotation {
                        0 => (mx, z),
                        1 => (l - 1 - z, mx),
                        2 => (w - 1 - mx, l - 1 - z),
                        _ => (z, w - 1 - mx),
                    };
                    let dst = (nx + nz * out_w + y * out_w * out_l) as usize;
                    cells[dst] = src;
                }
            }
        }

        Ok(Structure {
            name: name.to_string(),
            anchor,
            width: out_w,
            height: bp.height,
            length: out_l,
            rotation,
            mirrored,
            cells,
        })
    }
}
