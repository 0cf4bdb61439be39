pub mod notifier;
pub mod order_lifecycle;
pub mod reconciler;
