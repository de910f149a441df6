pub mod block;
pub mod build_info;
pub mod cli;
pub mod commands;
pub mod config;
pub mod decimal;
pub mod graph;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod store;
pub mod work;
