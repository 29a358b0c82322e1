pub mod client_handler;
pub mod constants;
pub mod default_client;
pub mod hasher;
pub mod job_formatter;
pub mod kaspaapi;
pub mod log_colors;
pub mod miner_detection;
pub mod mining_state;
pub mod notification_sender;
pub mod share_handler;
pub mod stratum_context;
pub mod stratum_listener;
pub mod stratum_server;

pub use client_handler::*;
pub use constants::*;
pub use default_client::*;
pub use hasher::*;
pub use job_formatter::*;
pub use kaspaapi::*;
pub use miner_detection::*;
pub use mining_state::*;
pub use notification_sender::*;
pub use share_handler::*;
pub use stratum_context::*;
pub use stratum_listener::*;
pub use stratum_server::*;
