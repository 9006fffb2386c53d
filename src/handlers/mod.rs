pub mod capture_handlers;
pub mod health_handlers;
pub mod sync_handlers;
