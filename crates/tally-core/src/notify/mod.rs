//! Webhook notifications and their retry queue.
//!
//! A tracking event becomes a [`WebhookPayload`] handed to a [`Transport`].
//! Failures that classify as retryable are parked in the [`RetryQueue`],
//! which a timer loop drains with increasing delays until the delivery
//! succeeds or runs out of attempts.

mod payload;
mod queue;
mod transport;
mod webhook;

pub use payload::{sign, EventType, WebhookPayload, PAYLOAD_VERSION};
pub use queue::{Dispatch, FailedDelivery, PollReport, RetryPolicy, RetryQueue, RetryableNotification};
pub use transport::{DeliveryError, Transport};
pub use webhook::{WebhookTransport, EVENT_HEADER, SIGNATURE_HEADER};
