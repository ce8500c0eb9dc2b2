//! Threadline library root.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod providers;
pub mod telegram;
pub mod transport;
pub mod web;

pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use core::{Dispatcher, InboundEvent, Task, UserKey, UserSerializer};
pub use error::{Error, Result};
pub use telegram::run_telegram_daemon;
pub use transport::Transport;
pub use web::run_web_server;
