pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {services::order_lifecycle::OrderLifecycle, std::sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<OrderLifecycle>,
    /// `None` rejects every provider notification.
    pub webhook_secret: Option<Arc<str>>,
}
