#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod capsule;
pub mod config;
pub mod data;
pub mod events;
pub mod feed;
pub mod logging;
pub mod media;
pub mod model;
pub mod pager;
pub mod profile;
pub mod session;
pub mod storage;
pub mod task;
pub mod thread;
pub mod tree;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
