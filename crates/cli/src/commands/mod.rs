pub mod flags;
pub mod status;
pub mod strategies;
