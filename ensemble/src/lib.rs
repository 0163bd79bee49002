//! Minimal client for the Aerotech Ensemble ASCII command interface.
//!
//! Covers what a commutation search needs: status and fault queries,
//! parameter writes, reset, absolute moves and the scope buffer.

pub mod client;
pub mod error;
pub mod protocol;
pub mod scope;
pub mod status;

pub use client::{DEFAULT_COMMAND_PORT, EnsembleClient};
pub use error::{EnsembleError, Result};
pub use scope::{DEFAULT_SCOPE_PORT, ScopeDataReader, TraceDataset};
pub use status::{AxisFault, AxisStatus};
