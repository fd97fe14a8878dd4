pub mod competencies;
pub mod core;
pub mod levels;
pub mod reports;
pub mod setup;
pub mod snapshots;
