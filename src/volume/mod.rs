//! Volume allocation and pool management

pub mod manager;
pub mod pool;

pub use manager::{AllocRet, AllocVolsArgs, VolumeManager};
