pub mod downloader;
pub mod engine;
pub mod index;
pub mod paths;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod scheduler;
#[cfg(test)]
mod test_support;
pub mod transfer;
