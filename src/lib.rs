#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod config;
pub mod context;
pub mod dom;
pub mod expansion;
pub mod layout;
pub mod logging;
pub mod markup;
pub mod observer;
pub mod thread;
pub mod ui;
pub mod view;
pub mod visibility;
pub mod watcher;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
