pub mod broker;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod converter;
pub mod domain;
pub mod dump;
pub mod error;
pub mod export;
pub mod graph;
pub mod ingest;
pub mod nested;
pub mod output;
pub mod staging;
pub mod summary;
pub mod traversal;
pub mod uploader;
pub mod workbook;
pub mod worker;
