pub mod config;
pub mod dns;
pub mod labels;
pub mod listener;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod server;
pub mod sniff;
pub mod worker;
