pub mod node;
pub mod topology;

pub use node::*;
pub use topology::*;
