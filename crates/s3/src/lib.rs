//! dynstore-s3: S3 backend adapter for dynstore
//!
//! Implements the `BackendAdapter` trait from dynstore-core on top of
//! aws-sdk-s3, and the converter that builds adapters for `type = "s3"`
//! backends.

pub mod client;
pub mod converter;

pub use client::S3Adapter;
pub use converter::S3Converter;
