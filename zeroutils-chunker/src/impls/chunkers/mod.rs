mod cdc;
mod fixed;
mod gear;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cdc::*;
pub use fixed::*;
pub use gear::*;
