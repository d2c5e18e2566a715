//! Data structures built on sequences

pub mod expiring_set;
pub mod expiry;

pub use expiring_set::ExpiringSet;
pub use expiry::Expiry;
