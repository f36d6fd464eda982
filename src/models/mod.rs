//! Core data models for the derivative pipeline.
//!
//! Keys follow the tenant-scoped `{tenant_id}/{namespace}/{filename}` layout,
//! events mirror the S3 bucket notification shape, and outcomes describe what
//! happened to each record of a batch.

pub mod event;
pub mod key;
pub mod object;
pub mod outcome;
