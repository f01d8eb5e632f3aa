pub mod acl_handlers;
pub mod health_handlers;
pub mod serve_handlers;
pub mod upload_handlers;
