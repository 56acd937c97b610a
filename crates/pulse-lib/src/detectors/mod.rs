pub mod ppg;
pub mod respiration;

pub use ppg::*;
pub use respiration::*;
