//! Circuit breaking for inter-service calls
//!
//! ```text
//! closed --(failures >= threshold)--> open --(timeout elapsed)--> half_open
//! half_open --(successes >= threshold)--> closed
//! half_open --(any failure)--> open
//! ```
//!
//! Circuit records live in a shared [`CircuitStore`] (Redis in production)
//! so that every worker of a service sees the same state.

pub mod lua_scripts;
pub mod redis;
pub mod registry;
pub mod retry;
pub mod store;
pub mod types;

pub use self::redis::RedisCircuitStore;
pub use registry::CircuitRegistry;
pub use retry::RetryExecutor;
pub use store::{CircuitStore, MemoryCircuitStore};
pub use types::{
    CircuitBreakerConfig, CircuitRecord, CircuitState, DependencyStatus, RetryConfig,
};
