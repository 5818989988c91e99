pub mod catalog;
pub mod entitlements;
pub mod settings_store;
pub mod usage_meters;
