//! IP addresses and name resolution (component C1).

mod address;
mod resolver;

pub use address::{Address, Family};
pub use resolver::{resolve, ResolveFlag, Resolver};
