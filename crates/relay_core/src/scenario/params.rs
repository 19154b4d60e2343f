use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grid::Cell;
use crate::oracle::RewardTable;
use crate::transfer::{parse_strategy, StrategyKind};

/// Default fuel for taxis when no explicit list is given.
const DEFAULT_FUEL: u32 = 10;

/// Which coordination variant drives the episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Resource, Serialize, Deserialize)]
pub enum CoordinationMode {
    /// One controller with global (snapshot) knowledge.
    Centralized,
    /// Vehicles negotiate via message passing with local knowledge only.
    Decentralized,
}

/// Centralized control cadence in ticks.
#[derive(Debug, Clone, Copy, Resource)]
pub struct ControlConfig {
    pub control_interval: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            control_interval: 1,
        }
    }
}

/// Bounds for the decentralized negotiation protocol.
#[derive(Debug, Clone, Copy, Resource, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Broadcast/bid/select cycles before the holder gives up and the
    /// passenger is marked stranded.
    pub max_rounds: u32,
    /// Ticks between a broadcast and its bid deadline. Two ticks cover the
    /// request delivery and the returning bids.
    pub round_ticks: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            round_ticks: 2,
        }
    }
}

/// Stop processing events at this tick, settled or not.
#[derive(Debug, Clone, Copy, Resource)]
pub struct SimulationEndTick(pub u64);

/// Parameters for building a relay scenario.
#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub map_layout: String,
    pub mode: CoordinationMode,
    /// `None` disables collaboration: holders carry passengers as far as
    /// they can and ground them.
    pub strategy: Option<StrategyKind>,
    pub taxi_fuels: Vec<u32>,
    /// Explicit starting cells; random traversable cells when `None`.
    pub taxi_positions: Option<Vec<Cell>>,
    pub taxi_seats: usize,
    /// Explicit (origin, destination) pairs; randomized when empty.
    pub passengers: Vec<(Cell, Cell)>,
    pub num_random_passengers: usize,
    pub seed: Option<u64>,
    pub control_interval: u64,
    pub negotiation: NegotiationConfig,
    pub rewards: RewardTable,
    pub end_tick: Option<u64>,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            map_layout: String::new(),
            mode: CoordinationMode::Centralized,
            strategy: Some(StrategyKind::Optimal),
            taxi_fuels: vec![DEFAULT_FUEL, DEFAULT_FUEL],
            taxi_positions: None,
            taxi_seats: 1,
            passengers: Vec::new(),
            num_random_passengers: 1,
            seed: None,
            control_interval: ControlConfig::default().control_interval,
            negotiation: NegotiationConfig::default(),
            rewards: RewardTable::default(),
            end_tick: None,
        }
    }
}

impl ScenarioParams {
    pub fn new(map_layout: impl Into<String>) -> Self {
        Self {
            map_layout: map_layout.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: CoordinationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strategy(mut self, strategy: Option<StrategyKind>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Parse a strategy from its configuration name; unknown names are a
    /// fatal configuration error.
    pub fn with_strategy_name(mut self, name: &str) -> Result<Self> {
        self.strategy = parse_strategy(name)?;
        Ok(self)
    }

    /// One entry per taxi; also fixes the fleet size.
    pub fn with_fuels(mut self, fuels: Vec<u32>) -> Self {
        self.taxi_fuels = fuels;
        self
    }

    pub fn with_taxi_positions(mut self, positions: Vec<Cell>) -> Self {
        self.taxi_positions = Some(positions);
        self
    }

    pub fn with_passenger(mut self, origin: Cell, destination: Cell) -> Self {
        self.passengers.push((origin, destination));
        self
    }

    pub fn with_random_passengers(mut self, count: usize) -> Self {
        self.num_random_passengers = count;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_control_interval(mut self, ticks: u64) -> Self {
        self.control_interval = ticks;
        self
    }

    pub fn with_negotiation(mut self, negotiation: NegotiationConfig) -> Self {
        self.negotiation = negotiation;
        self
    }

    pub fn with_end_tick(mut self, tick: u64) -> Self {
        self.end_tick = Some(tick);
        self
    }
}
