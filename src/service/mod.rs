//! Service discovery, disk routing, and host punishment

pub mod controller;
pub mod roster;

pub use controller::{HostIdc, ServiceController};
pub use roster::HostEntry;
