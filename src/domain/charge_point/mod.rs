pub mod identity;

pub use identity::ChargePointIdentity;
