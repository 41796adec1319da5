pub mod config;
pub mod error;
pub mod filter;
pub mod kpi;
pub mod matcher;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod records;
