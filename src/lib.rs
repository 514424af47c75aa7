//! newsvoice: turn news articles into short spoken summaries.

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod pipeline;
