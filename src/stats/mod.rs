//! Grouped reductions and paired differences over tagged observations.

pub mod difference;
pub mod kernel;
pub mod reduce;
