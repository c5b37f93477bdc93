//! Image description service
//!
//! Resizes uploaded images, stores them in S3-compatible object storage and
//! classifies them with a vision-capable language model. Classification of a
//! request runs as a retry/backoff loop that survives rate limits and
//! transient failures while persisting partial progress.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
