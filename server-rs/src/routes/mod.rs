pub mod entitlements;
pub mod health;
pub mod plans;
pub mod settings;
pub mod usage;
