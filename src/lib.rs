//! # crossarb
//!
//! Cross-chain flash-loan arbitrage engine. Discovery side: a market graph
//! of `(chain, asset)` nodes with copy-on-write snapshots, a pure loan-size
//! optimizer, and a scan scheduler. Execution side: an at-least-once signal
//! channel with a durable file fallback, and a simulate-before-submit
//! coordinator backed by a per-sender nonce allocator and per-scope circuit
//! breakers. Every network dependency sits behind a trait in
//! [`blockchain`], so the whole pipeline runs against in-memory fakes in
//! tests.

pub mod advisors;
pub mod blockchain;
pub mod bridges;
pub mod config;
pub mod errors;
pub mod executor;
pub mod gas_oracle;
pub mod graph;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod signal;
pub mod types;

pub use config::Config;
pub use executor::{CircuitBreakerRegistry, ExecutionCoordinator, NonceAllocator};
pub use graph::{GraphSnapshot, MarketGraph};
pub use scheduler::OpportunityScheduler;
pub use signal::{FileSpool, InProcessBroker, SignalConsumer, SignalPublisher};
