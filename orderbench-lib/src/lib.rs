#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod check;
pub mod client;
pub mod config;
pub mod idempotency;
pub mod iteration;
pub mod order;
pub mod utils;
