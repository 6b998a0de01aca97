//! Testing utilities and harness for Trellis

pub mod fixtures;
pub mod gate;
pub mod harness;
pub mod policy;

pub use fixtures::*;
pub use gate::{Gate, GatedCalculation};
pub use harness::TreeHarness;
pub use policy::ManualThreadPolicy;

pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::gate::{Gate, GatedCalculation};
    pub use crate::harness::TreeHarness;
    pub use crate::policy::ManualThreadPolicy;
}
