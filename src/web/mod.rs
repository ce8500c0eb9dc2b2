//! Status server module (Axum).

pub mod router;
pub mod server;

pub use server::run_web_server;
