pub mod catalog;
pub mod core;
pub mod grading;
pub mod marks;
pub mod results;
