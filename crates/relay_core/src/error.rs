//! Error taxonomy for the relay core.
//!
//! Map and strategy errors are fatal at scenario setup; everything else is a
//! per-passenger condition that callers convert into a status transition
//! (`Stranded`) rather than propagating upward.

use thiserror::Error;

use crate::grid::Cell;
use crate::oracle::TaxiId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Malformed map layout. Fatal at setup.
    #[error("invalid map: {reason}")]
    InvalidMap { reason: String },

    /// No path exists between two cells. The target is infeasible, not fatal.
    #[error("no path from {from} to {to}")]
    Unreachable { from: Cell, to: Cell },

    /// A move would take the taxi's fuel negative. The caller transitions the
    /// held passenger to `Stranded`.
    #[error("{taxi} is out of fuel")]
    OutOfFuel { taxi: TaxiId },

    /// The bounded negotiation round limit was reached without a usable bid.
    #[error("negotiation gave up after {rounds} rounds")]
    NegotiationTimeout { rounds: u32 },

    /// Unrecognized strategy name in configuration. Fatal at startup.
    #[error("unknown transfer strategy {name:?}")]
    UnknownStrategy { name: String },
}

pub type Result<T> = std::result::Result<T, RelayError>;
