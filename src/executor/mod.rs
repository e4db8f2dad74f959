//! # Execution Side
//!
//! Everything downstream of a signal: the coordinator state machine, nonce
//! allocation, and the per-scope circuit breaker.

pub mod circuit_breaker;
pub mod coordinator;
pub mod nonce;

pub use circuit_breaker::CircuitBreakerRegistry;
pub use coordinator::ExecutionCoordinator;
pub use nonce::NonceAllocator;
