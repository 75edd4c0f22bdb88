//! Compiled cache behaviors, selected per request path.

pub mod compile;
pub mod matcher;
pub mod model;

pub use compile::{CompileOptions, compile_behaviors};
pub use matcher::BehaviorSet;
pub use model::{CompiledBehavior, MethodMask, PathMatcher};
