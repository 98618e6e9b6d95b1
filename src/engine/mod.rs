mod lru_cache;
mod query;
mod rate_limiter;
mod sync;

pub use lru_cache::*;
pub use query::*;
pub use rate_limiter::*;
pub use sync::*;
