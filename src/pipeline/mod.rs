pub mod context;
pub mod persistence;
pub mod song;
