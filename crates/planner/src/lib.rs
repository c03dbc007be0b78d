pub mod builder;
pub mod explain;
pub mod iteration_plan;

pub use builder::*;
pub use explain::*;
pub use iteration_plan::*;
