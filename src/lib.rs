pub mod binance;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod features;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod predictor;
pub mod retriever;
pub mod retry;
pub mod snapshot;
