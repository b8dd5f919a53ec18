//! HTTP handlers. Pages render HTML; the `/api` handlers speak JSON and SSE.

pub mod health_handlers;
pub mod image_handlers;
pub mod page_handlers;
