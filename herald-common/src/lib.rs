pub mod logging;
pub mod notification;

pub use notification::{Channel, Content, NotificationKind, Recipient};
pub use tracing;

/// Lifecycle signal broadcast from the controller to every long-running loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
