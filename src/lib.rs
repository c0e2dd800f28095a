pub mod archive;
pub mod config;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod klines;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod storage_utils;

pub use error::{FetchError, Result};
