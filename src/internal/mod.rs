//! Internal numeric kernels.
//!
//! - `kalman`: linear Kalman filter over `nalgebra` dynamic matrices
//! - `optimize`: linear sum assignment used by the association step

pub mod kalman;
pub mod optimize;
