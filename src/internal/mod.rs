pub mod baseline;
pub mod comparator;
pub mod diff_report;
pub mod error;
pub mod fixtures;
pub mod harness;
pub mod hasher;
pub mod models;
pub mod renderer;
