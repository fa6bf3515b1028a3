pub mod chain;
pub mod resolver;

pub use chain::{RequestContext, ScopeChain, ScopeLevel};
pub use resolver::ScopeResolver;
