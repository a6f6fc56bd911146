//! Domain types shared by every layer

pub mod charge_point;

pub use charge_point::ChargePointIdentity;
