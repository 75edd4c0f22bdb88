//! Cache behavior configuration: which path patterns are transformed, which bypass to the
//! origin, and the caching, query and CORS policy attached to each.

mod loader;
pub mod model;

pub use loader::{DEFAULT_BYPASS_PATTERN, load_behaviors, parse_behaviors};
pub use model::{Behavior, BehaviorTarget, BehaviorsConfig, MethodMatch, TtlBounds};
