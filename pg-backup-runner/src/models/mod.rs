//! Data models shared by the executors.

pub mod backup;
pub mod status;
