// Data-driven worker configuration.
//
// All tunable parameters the scheduler and construction engine read live
// here in `WorkerConfig`, loadable from JSON. The engines never use magic
// numbers — they read from the config. This enables balance iteration
// without recompilation and keeps every timing constant testable.
//
// Delay values are in ticks. The fault backoff is the one deliberately odd
// knob: `base_fault_timeout * fault_counter` with the counter doubling on
// every fault and, by default, never resetting — see
// `reset_fault_counter_on_success` for the opt-in reset policy.
//
// See also: `scheduler.rs` for the delay/backoff machinery that consumes
// most of these, `worker.rs` for the dump thresholds, `construction.rs`
// for the working ranges and build delays, `cursor.rs` for the per-tick
// cell budget.
//
// **Critical constraint: determinism.** Config values feed directly into
// simulation logic. Replays require identical configs.

use crate::types::CellBlock;
use serde::{Deserialize, Serialize};

/// Every tunable the worker core reads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Ticks subtracted from the delay countdown per simulation step.
    pub tick_rate: u32,
    /// Default delay after a terminated action.
    pub standard_delay: u32,
    /// Delay applied when the worker starts walking somewhere.
    pub walk_delay: u32,
    /// How often the request-waiting loop rechecks open/completed requests.
    pub delay_recheck: u32,
    /// The countdown triggers a work swing every this many ticks.
    pub hit_every_x_ticks: u32,

    /// Base backoff applied on the first tick fault; multiplied by the
    /// agent's fault counter on each subsequent fault.
    pub base_fault_timeout: u32,
    /// When `true`, a tick that completes without a fault restores the
    /// fault counter to 1. Off by default: the counter only ever grows.
    pub reset_fault_counter_on_success: bool,

    /// Actions done before the worker walks home to dump its inventory.
    pub actions_until_dump: u32,
    /// Dump floor: probabilistic dumping kicks in when open slots fall
    /// below twice this value.
    pub min_open_slots: u32,
    /// Stacks smaller than this get a 50/50 dump-anyway coin flip.
    pub coin_flip_dump_threshold: u32,
    /// Stacks at or above the threshold dump with probability
    /// `proportional_dump_chance / stack count`.
    pub proportional_dump_chance: u32,

    /// How close the agent must stand to a cached standing cell before the
    /// delay countdown resumes.
    pub default_range_for_delay: u32,
    /// The range the builder tries to reach from its working position.
    pub standard_working_range: u32,
    /// Builders already within this range of the site skip walking.
    pub min_working_range: u32,
    /// Extra distance from the structure footprint when picking a spot to
    /// build from.
    pub min_additional_range_to_build: u32,
    /// Cap on the expanding ring search for a working position.
    pub max_additional_range_to_build: u32,

    /// Cells the structure cursor may visit per tick before reporting its
    /// budget exhausted.
    pub cells_per_tick: u32,
    /// Skip all material bookkeeping: clear instantly, place from nothing.
    pub infinite_resources: bool,
    /// Base delay per placed cell; scaled down by agent level.
    pub build_block_delay: u32,
    /// Base delay for an instant clear (infinite resources / liquids).
    pub unlimited_clear_delay: u32,
    /// Base delay for a timed mine action.
    pub mine_delay: u32,
    /// Level scaling divisor for build/clear delays.
    pub progress_multiplier: u32,
    /// Filler placed for substitution-marked cells.
    pub solid_substitution_block: CellBlock,

    /// Experience granted per completed structure.
    pub xp_each_building: f32,
    /// Experience granted per placed cell.
    pub xp_each_block: f32,
    /// Experience per agent level.
    pub xp_per_level: f32,
    /// Saturation cost of a counted action.
    pub saturation_per_action: f32,
    /// Saturation cost of continuous work (mining, placing).
    pub saturation_per_continuous_action: f32,

    /// Pickup priority granted while workplace storage is saturated.
    pub max_pickup_priority: u32,
    /// Normal workplace pickup priority.
    pub normal_pickup_priority: u32,

    /// Agent inventory slot count.
    pub inventory_size: u32,
    /// Workplace storage slot count.
    pub storage_size: u32,
    /// Highest tool level the workplace can request.
    pub max_tool_level: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 1,
            standard_delay: 5,
            walk_delay: 20,
            delay_recheck: 60,
            hit_every_x_ticks: 5,

            base_fault_timeout: 100,
            reset_fault_counter_on_success: false,

            actions_until_dump: 32,
            min_open_slots: 5,
            coin_flip_dump_threshold: 16,
            proportional_dump_chance: 8,

            default_range_for_delay: 4,
            standard_working_range: 5,
            min_working_range: 12,
            min_additional_range_to_build: 3,
            max_additional_range_to_build: 25,

            cells_per_tick: 5,
            infinite_resources: false,
            build_block_delay: 10,
            unlimited_clear_delay: 5,
            mine_delay: 10,
            progress_multiplier: 10,
            solid_substitution_block: CellBlock::Stone,

            xp_each_building: 10.0,
            xp_each_block: 0.1,
            xp_per_level: 10.0,
            saturation_per_action: 0.02,
            saturation_per_continuous_action: 0.002,

            max_pickup_priority: 10,
            normal_pickup_priority: 1,

            inventory_size: 27,
            storage_size: 54,
            max_tool_level: 2,
        }
    }
}

impl WorkerConfig {
    /// Level-scaled delay: base work cost shrinks as the agent levels up.
    pub fn scaled_delay(&self, base: u32, level: u32) -> u32 {
        base * self.progress_multiplier / (level + self.progress_multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = WorkerConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored: WorkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.delay_recheck, config.delay_recheck);
        assert_eq!(restored.cells_per_tick, config.cells_per_tick);
        assert_eq!(
            restored.solid_substitution_block,
            config.solid_substitution_block
        );
    }

    #[test]
    fn config_loads_from_json_string() {
        let mut config = WorkerConfig::default();
        config.base_fault_timeout = 7;
        config.reset_fault_counter_on_success = true;
        let json = serde_json::to_string(&config).unwrap();
        let loaded: WorkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.base_fault_timeout, 7);
        assert!(loaded.reset_fault_counter_on_success);
    }

    #[test]
    fn scaled_delay_shrinks_with_level() {
        let config = WorkerConfig::default();
        let fresh = config.scaled_delay(10, 0);
        let veteran = config.scaled_delay(10, 20);
        assert_eq!(fresh, 10);
        assert!(veteran < fresh);
    }
}
