pub mod api;
pub mod classification;
pub mod image;
pub mod job;
pub mod label;
