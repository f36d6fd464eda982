pub mod local_store;
pub mod notifier;
pub mod object_store;
pub mod pipeline;
pub mod retry;
pub mod s3_store;
pub mod transformer;
