//! Transfer-point planning: where a passenger hand-off between two vehicles
//! should happen.
//!
//! Three interchangeable strategies behind one trait, selected by
//! configuration. All are pure functions of the graph and a
//! [`TransferRequest`]; identical inputs always give identical proposals.

pub mod algorithm;
pub mod farthest_on_path;
pub mod optimal;
pub mod route_projection;
pub mod types;

pub use algorithm::{TransferStrategy, TransferStrategyResource};
pub use farthest_on_path::FarthestOnPath;
pub use optimal::OptimalTransfer;
pub use route_projection::RouteProjection;
pub use types::{StrategyKind, TransferProposal, TransferRequest, VehicleSnapshot};

use crate::error::{RelayError, Result};

/// Parse a strategy name from configuration. `"none"` disables collaboration;
/// any unrecognized name is a fatal configuration error.
pub fn parse_strategy(name: &str) -> Result<Option<StrategyKind>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "none" => Ok(None),
        "optimal" => Ok(Some(StrategyKind::Optimal)),
        "h1" | "route-projection" => Ok(Some(StrategyKind::RouteProjection)),
        "h2" | "farthest-on-path" => Ok(Some(StrategyKind::FarthestOnPath)),
        _ => Err(RelayError::UnknownStrategy {
            name: name.to_string(),
        }),
    }
}

/// Construct a boxed strategy from its kind descriptor.
pub fn build_transfer_strategy(kind: StrategyKind) -> Box<dyn TransferStrategy> {
    match kind {
        StrategyKind::Optimal => Box::new(OptimalTransfer),
        StrategyKind::RouteProjection => Box::new(RouteProjection),
        StrategyKind::FarthestOnPath => Box::new(FarthestOnPath),
    }
}
