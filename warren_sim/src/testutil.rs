// Shared test fixture: a small world with a solid floor, one workplace,
// and one agent standing at it. Test-only.

use crate::agent::{Agent, Job, JobKind};
use crate::building::Building;
use crate::config::WorkerConfig;
use crate::placement::PlacementRegistry;
use crate::prng::GameRng;
use crate::scheduler::TickEnv;
use crate::structure::StructureStore;
use crate::types::{AgentId, BuildingId, CellBlock, CellPos, CellState};
use crate::world::CellWorld;

pub struct Fixture {
    pub world: CellWorld,
    pub building: Building,
    pub agent: Agent,
    pub job: Job,
    pub config: WorkerConfig,
    pub registry: PlacementRegistry,
    pub store: StructureStore,
}

impl Fixture {
    /// 24x12x24 world with a soil floor at y=0, workplace and agent at
    /// (2, 1, 2).
    pub fn new() -> Self {
        let config = WorkerConfig::default();
        let mut rng = GameRng::new(1);
        let mut world = CellWorld::new(24, 12, 24);
        for x in 0..24 {
            for z in 0..24 {
                world.set(CellPos::new(x, 0, z), CellState::of(CellBlock::Soil));
            }
        }
        let home = CellPos::new(2, 1, 2);
        Self {
            world,
            building: Building::new(BuildingId::new(&mut rng), home, &config),
            agent: Agent::new(AgentId::new(&mut rng), "testworker", home, 7, &config),
            job: Job::new(JobKind::Builder),
            config,
            registry: PlacementRegistry::standard(),
            store: StructureStore::new(),
        }
    }

    pub fn env(&mut self) -> TickEnv<'_> {
        TickEnv {
            world: &mut self.world,
            building: &mut self.building,
            agent: &mut self.agent,
            job: &mut self.job,
            config: &self.config,
            registry: &self.registry,
        }
    }
}
