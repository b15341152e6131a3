pub mod admin;
pub mod dashboard;
pub mod pending;
pub mod server_locks;
