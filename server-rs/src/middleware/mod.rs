pub mod entitlements;
pub mod rate_limit;

pub use entitlements::*;
pub use rate_limit::*;
