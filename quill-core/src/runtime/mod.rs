pub mod event;
pub mod pool;
pub mod registry;
pub mod request;
pub mod stream;
pub mod task;
pub mod types;

#[cfg(test)]
mod tests;
