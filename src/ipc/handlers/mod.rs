pub mod attendance;
pub mod batches;
pub mod cache;
pub mod core;
pub mod students;
