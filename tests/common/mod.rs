pub mod harness;
pub mod outputs;

pub use harness::*;
pub use outputs::*;
