pub mod app;
pub mod approvals;
pub mod config;
pub mod gateway;
pub mod selection;
pub mod session;
pub mod shared;
pub mod stream;
pub mod workflow;
