pub mod policy;

pub use policy::{PolicyTable, PolicyTableBuilder, RoutePolicy};
