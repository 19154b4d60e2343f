//! Scenario assembly: parameters in, a ready-to-run [`bevy_ecs::world::World`] out.

mod build;
mod params;

pub use build::build_scenario;
pub use params::{
    ControlConfig, CoordinationMode, NegotiationConfig, ScenarioParams, SimulationEndTick,
};
