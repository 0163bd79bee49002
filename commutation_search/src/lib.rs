//! Commutation offset search for Aerotech Ensemble driven axes.
//!
//! `calibrate` sweeps the `CommutationOffset` parameter and captures a scope
//! trace of a full travel scan for every offset. `plot_calibration` reads the
//! saved traces back and plots the current drawn at each offset.

pub mod analysis;
pub mod config;
pub mod connection;
pub mod controller;
pub mod logging;
pub mod plot;
pub mod procedure;
pub mod results;
pub mod sweep;
