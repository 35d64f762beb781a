pub mod client;
pub mod config;
pub mod generator;
pub mod imagery;
pub mod llm;
pub mod logger;
pub mod models;
pub mod news;
pub mod quick_post;
pub mod scheduler;
pub mod server;
pub mod storage;
