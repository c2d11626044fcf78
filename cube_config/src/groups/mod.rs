pub mod client;
pub mod fetch;
