pub mod access;
pub mod ids;

pub use access::*;
pub use ids::*;
