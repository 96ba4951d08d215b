//! HTTP surface and background jobs of the nutri-tracker backend.
//!
//! The binary in `main.rs` wires these together; the router is also usable
//! on its own by hosts that own the socket.

pub mod api;
pub mod middleware;
pub mod scheduler;
pub mod server;

pub use api::{build_app, AppState};
pub use server::serve;
