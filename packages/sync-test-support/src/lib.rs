//! Sync test support utilities
//!
//! Shared tooling for the game-sync integration tests: logging bootstrap, an
//! in-memory realtime transport with a scriptable server side, a scripted
//! HTTP API and snapshot fixtures.

pub mod fake_api;
pub mod fixtures;
pub mod logging;
pub mod memory_transport;

pub use fake_api::{FakeGameApi, Gate};
pub use memory_transport::{MemoryServer, MemoryTransport, ServerSocket};
