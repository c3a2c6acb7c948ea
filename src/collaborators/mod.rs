pub mod network;
pub mod volume;
