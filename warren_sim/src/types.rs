// Core types shared across the simulation.
//
// Defines spatial coordinates (`CellPos`), entity identifiers (strongly-typed
// UUID v4 wrappers), cell materials (`CellBlock`/`CellState`), and tool
// classes. All types derive `Serialize` and `Deserialize` for save/load.
//
// **Critical constraint: determinism.** Entity IDs are generated from a
// `GameRng` (see `warren_prng`). Do not use external UUID libraries or OS
// entropy.

use crate::prng::GameRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A position in the 3D cell grid. Each component is in cell units.
///
/// The coordinate system uses right-handed conventions:
/// - X: east  (positive) / west  (negative)
/// - Y: up    (positive) / down  (negative)
/// - Z: south (positive) / north (negative)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Manhattan distance between two positions.
    pub fn manhattan_distance(self, other: Self) -> u32 {
        ((self.x - other.x).unsigned_abs())
            + ((self.y - other.y).unsigned_abs())
            + ((self.z - other.z).unsigned_abs())
    }

    /// Chebyshev (chessboard) distance — the walk metric. An agent standing
    /// within Chebyshev range `r` of a cell can work on it.
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        ((self.x - other.x).unsigned_abs())
            .max((self.y - other.y).unsigned_abs())
            .max((self.z - other.z).unsigned_abs())
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl fmt::Display for CellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Entity IDs — deterministic UUID v4
// ---------------------------------------------------------------------------

/// A UUID v4, generated deterministically from the simulation PRNG.
///
/// Layout follows RFC 4122: 128 bits with version nibble (bits 48–51) set
/// to `0100` and variant bits (bits 64–65) set to `10`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimUuid([u8; 16]);

impl SimUuid {
    /// Generate a deterministic UUID v4 from the simulation PRNG.
    pub fn new_v4(rng: &mut GameRng) -> Self {
        let mut bytes = rng.next_128_bits();
        // Set version nibble (byte 6, upper nibble) to 0100.
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        // Set variant bits (byte 8, upper 2 bits) to 10.
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Self(bytes)
    }

    /// Parse a UUID from its 8-4-4-4-12 hex string representation.
    pub fn parse(s: &str) -> Option<Self> {
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Custom serde: serialize as the 8-4-4-4-12 hex string so SimUuid can be
// used as a JSON map key (serde_json requires string keys).
impl Serialize for SimUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SimUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SimUuid::parse(&s).ok_or_else(|| serde::de::Error::custom("invalid UUID format"))
    }
}

impl fmt::Debug for SimUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimUuid({})", self)
    }
}

impl fmt::Display for SimUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Standard 8-4-4-4-12 hex representation.
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3],
            b[4], b[5],
            b[6], b[7],
            b[8], b[9],
            b[10], b[11], b[12], b[13], b[14], b[15],
        )
    }
}

// ---------------------------------------------------------------------------
// Strongly-typed entity ID wrappers
// ---------------------------------------------------------------------------

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub SimUuid);

        impl $name {
            pub fn new(rng: &mut GameRng) -> Self {
                Self(SimUuid::new_v4(rng))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

entity_id!(/// Unique identifier for a worker agent.
AgentId);
entity_id!(/// Unique identifier for a workplace building.
BuildingId);
entity_id!(/// Unique identifier for a material or tool request.
RequestId);
entity_id!(/// Unique identifier for a spawned structure object (stand, lantern).
SpawnId);

// ---------------------------------------------------------------------------
// Cell materials
// ---------------------------------------------------------------------------

/// The material of a single cell in the world grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellBlock {
    Air,
    Soil,
    TilledSoil,
    Stone,
    Plank,
    Glass,
    Water,
    Torch,
    Ladder,
    Leaves,
    Bedrock,
    /// Blueprint marker: "make this cell solid with whatever filler the
    /// behavior designates". Never placed into the world directly.
    Substitution,
}

impl CellBlock {
    /// Solid cells block movement and count for the structural build pass.
    pub fn is_solid(self) -> bool {
        matches!(
            self,
            Self::Soil
                | Self::TilledSoil
                | Self::Stone
                | Self::Plank
                | Self::Glass
                | Self::Bedrock
                | Self::Substitution
        )
    }

    pub fn is_liquid(self) -> bool {
        matches!(self, Self::Water)
    }

    /// Protected cells are never cleared, mined, or built over.
    pub fn is_protected(self) -> bool {
        matches!(self, Self::Bedrock)
    }

    /// Free materials are buildable at no item cost (water flows in,
    /// leaves regrow). Clearing them costs nothing either.
    pub fn is_free_material(self) -> bool {
        matches!(self, Self::Air | Self::Water | Self::Leaves)
    }
}

impl Default for CellBlock {
    fn default() -> Self {
        Self::Air
    }
}

/// Full state of a world cell: material plus a variant byte (orientation,
/// growth step, attachment face).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellState {
    pub block: CellBlock,
    pub variant: u8,
}

impl CellState {
    pub const AIR: CellState = CellState {
        block: CellBlock::Air,
        variant: 0,
    };

    pub const fn of(block: CellBlock) -> Self {
        Self { block, variant: 0 }
    }

    pub fn is_air(self) -> bool {
        self.block == CellBlock::Air
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Tool classes an agent can hold. Levels are integer bands: a level-N tool
/// harvests any cell whose required level is <= N.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolKind {
    None,
    Pickaxe,
    Shovel,
    Axe,
    Hoe,
}

impl ToolKind {
    /// The best tool class for harvesting a cell of the given material.
    pub fn best_for(block: CellBlock) -> ToolKind {
        match block {
            CellBlock::Stone | CellBlock::Glass => ToolKind::Pickaxe,
            CellBlock::Soil => ToolKind::Shovel,
            CellBlock::TilledSoil => ToolKind::Hoe,
            CellBlock::Plank | CellBlock::Ladder => ToolKind::Axe,
            _ => ToolKind::None,
        }
    }

    /// The minimum tool level required to harvest the given material.
    pub fn required_level(block: CellBlock) -> u32 {
        match block {
            CellBlock::Stone => 1,
            _ => 0,
        }
    }
}

/// Priority of an interactive prompt raised toward the player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PromptPriority {
    /// Asynchronous request pending — informational.
    Pending,
    /// Needs attention soon.
    Important,
    /// The worker is stalled until this is handled.
    Blocking,
}
