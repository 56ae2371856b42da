//! # Models
//!
//! Structured additive regression: predictor surfaces and their response
//! families, design and penalty collaborators, the parameter blocks that
//! update them, equations grouping blocks, and the sweep scheduler.

pub mod blocks;
pub mod design;
pub mod equation;
pub mod families;
pub mod penalty;
pub mod posterior;
pub mod predictor;
pub mod report;
pub mod scheduler;
pub mod types;
