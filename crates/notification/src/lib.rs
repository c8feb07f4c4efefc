//! Notification consumers.
//!
//! Subscribes to the two outcome queues and turns each event into a
//! customer email: a confirmation with the charged total, or a
//! cancellation carrying the reason settlement recorded. Notification
//! never writes to the store and never publishes messages.

pub mod consumer;
pub mod error;
pub mod mailer;

pub use consumer::{CancellationNotifier, ConfirmationNotifier};
pub use error::NotificationError;
pub use mailer::{Email, LogMailer, MailError, MailTransport, MemoryMailer};
