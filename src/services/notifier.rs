use {
    crate::domain::{error::CheckoutError, store::OrderDetails},
    std::{future::Future, pin::Pin},
};

/// Delivers the "your tickets" confirmation to a buyer. Delivery itself
/// (mail, SMS) lives outside this service.
pub trait ConfirmationNotifier: Send + Sync {
    fn send_confirmation(
        &self,
        details: OrderDetails,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckoutError>> + Send + '_>>;
}

/// Notifier that only records the hand-off in the log.
pub struct LogNotifier;

impl ConfirmationNotifier for LogNotifier {
    fn send_confirmation(
        &self,
        details: OrderDetails,
    ) -> Pin<Box<dyn Future<Output = Result<(), CheckoutError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                order_id = %details.order.id,
                state = %details.order.state,
                tickets = details.tickets.len(),
                "confirmation handed off"
            );
            Ok(())
        })
    }
}
