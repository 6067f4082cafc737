pub mod activities;
pub mod core;
pub mod directory;
pub mod reports;
