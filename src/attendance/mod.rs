//! Attendance aggregation: absentee lists and period rollups.

pub mod absentees;
pub mod rollup;

pub use absentees::*;
pub use rollup::*;
