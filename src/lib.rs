pub mod batch;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod member;
pub mod provider;
pub mod recipients;
pub mod render;
pub mod segment;
pub mod storage;
pub mod web;
