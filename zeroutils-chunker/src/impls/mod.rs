mod chunkers;
mod erasure;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use chunkers::*;
pub use erasure::*;
