// Stage-ordered traversal cursor over a structure's cells.
//
// Construction proceeds in ordered stages (`Stage`), and within each stage
// the cursor walks the blueprint one cell at a time:
// - REMOVE and CLEAR walk top-down (highest layer first) so nothing is
//   undermined while standing on it;
// - BUILD, DECORATE, and SPAWN walk bottom-up so every layer rests on the
//   one below.
//
// `advance` skips cells the current stage has no business visiting (a
// spawn pass doesn't stop on plain wall cells), consuming the per-tick
// budget per cell scanned. When the budget runs out mid-scan it reports
// `LimitReached` and the engine resumes from the same spot next tick.
//
// The cursor is a plain owned value stored in the construction engine and
// dereferenced fresh each tick — traversal state never hides in closures.
// Its `(CellPos, Stage)` progress pair is what the workplace persists to
// support mid-build resume after a reload.
//
// **Invariant:** traversal is monotonic within a stage; the cursor never
// regresses except through an explicit `set_progress`/`set_stage`, and
// `AtEnd` marks each stage boundary exactly once per pass.

use crate::structure::{Structure, StructureCell};
use crate::types::{CellBlock, CellPos};
use serde::{Deserialize, Serialize};

/// One phase of structure construction, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    /// Tear the whole footprint down (demolition orders).
    Remove,
    /// Clear the footprint of anything that isn't part of the target.
    Clear,
    /// Place the structural (solid) cells.
    Build,
    /// Place the non-solid trim: torches, ladders, fluids.
    Decorate,
    /// Assemble and place spawnable objects.
    Spawn,
    /// Nothing left to traverse.
    Complete,
}

impl Stage {
    /// Whether this stage walks the blueprint from the top layer down.
    fn top_down(self) -> bool {
        matches!(self, Stage::Remove | Stage::Clear)
    }

    /// Whether a stage pass should stop on the given blueprint cell.
    fn wants(self, cell: &StructureCell) -> bool {
        match self {
            Stage::Remove | Stage::Clear => cell.content.is_some(),
            Stage::Build => cell
                .content
                .is_some_and(|c| c.block.is_solid() || c.block == CellBlock::Air),
            Stage::Decorate => cell
                .content
                .is_some_and(|c| !c.block.is_solid() && c.block != CellBlock::Air),
            Stage::Spawn => !cell.spawnables.is_empty(),
            Stage::Complete => false,
        }
    }
}

/// Result of one `advance` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// The stage is exhausted; switch to the next one.
    AtEnd,
    /// The per-tick cell budget ran out; resume next tick.
    LimitReached,
    /// Moved to the next relevant cell; process it next tick.
    Continue,
}

/// Mutable traversal position over a structure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructureCursor {
    stage: Stage,
    local: CellPos,
    width: u32,
    height: u32,
    length: u32,
    /// Cells the cursor may visit per tick.
    budget: u32,
    #[serde(skip)]
    remaining: u32,
    exhausted: bool,
}

impl StructureCursor {
    pub fn new(structure: &Structure, stage: Stage, budget: u32) -> Self {
        let mut cursor = Self {
            stage,
            local: CellPos::new(0, 0, 0),
            width: structure.width,
            height: structure.height,
            length: structure.length,
            budget: budget.max(1),
            remaining: 0,
            exhausted: false,
        };
        cursor.local = cursor.first_cell(stage);
        cursor
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Local coordinate of the current cell, or `None` once the traversal
    /// has nothing left (COMPLETE stage).
    pub fn current(&self) -> Option<CellPos> {
        (self.stage != Stage::Complete).then_some(self.local)
    }

    /// The persistable `(position, stage)` pair.
    pub fn progress(&self) -> (CellPos, Stage) {
        (self.local, self.stage)
    }

    /// Restore a persisted progress pair (mid-build resume on reload).
    pub fn set_progress(&mut self, local: CellPos, stage: Stage) {
        self.stage = stage;
        self.local = local;
        self.exhausted = false;
    }

    /// Jump to the start of `stage`. The only way the cursor moves between
    /// stages.
    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.local = self.first_cell(stage);
        self.exhausted = false;
    }

    /// Refill the per-tick cell budget. Called once per engine pass.
    pub fn begin_pass(&mut self) {
        self.remaining = self.budget;
    }

    fn first_cell(&self, stage: Stage) -> CellPos {
        if stage.top_down() {
            CellPos::new(0, self.height as i32 - 1, 0)
        } else {
            CellPos::new(0, 0, 0)
        }
    }

    /// The cell after `pos` in this stage's traversal order, or `None` past
    /// the end.
    fn next_cell(&self, pos: CellPos) -> Option<CellPos> {
        let mut next = pos;
        next.x += 1;
        if (next.x as u32) < self.width {
            return Some(next);
        }
        next.x = 0;
        next.z += 1;
        if (next.z as u32) < self.length {
            return Some(next);
        }
        next.z = 0;
        if self.stage.top_down() {
            next.y -= 1;
            (next.y >= 0).then_some(next)
        } else {
            next.y += 1;
            ((next.y as u32) < self.height).then_some(next)
        }
    }

    /// Move past the current cell to the next one this stage wants,
    /// consuming budget per cell scanned.
    pub fn advance(&mut self, structure: &Structure) -> Advance {
        if self.exhausted || self.stage == Stage::Complete {
            return Advance::AtEnd;
        }
        loop {
            if self.remaining == 0 {
                return Advance::LimitReached;
            }
            self.remaining -= 1;
            match self.next_cell(self.local) {
                None => {
                    self.exhausted = true;
                    return Advance::AtEnd;
                }
                Some(pos) => {
                    self.local = pos;
                    if self.stage.wants(structure.cell(pos)) {
                        return Advance::Continue;
                    }
                    // Irrelevant to this stage — keep scanning.
                }
            }
        }
    }
}
