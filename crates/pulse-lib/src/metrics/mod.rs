pub mod amplitude;
pub mod hrv;
pub mod sqi;

pub use amplitude::*;
pub use hrv::*;
pub use sqi::*;
