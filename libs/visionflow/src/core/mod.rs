pub mod context;
pub mod error;
pub mod graph;
pub mod handles;
pub mod kernel;
pub mod memory;
pub mod meta;
pub mod node;
pub mod objects;
pub mod perf;
pub mod reference;
pub mod target;
pub mod types;
pub mod zones;
