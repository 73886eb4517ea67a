//! Push relay: keeps the subscription registry, signs and encrypts Web Push
//! messages, and serves the app shell.

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod registry;
pub mod vapid;
pub mod webpush;

pub use crate::dispatcher::{DispatchError, DispatchReport, Dispatcher};
pub use crate::registry::{SubscriptionRegistry, SubscriptionStore};
pub use crate::vapid::VapidKeys;
pub use crate::webpush::{DeliveryError, PushTransport, WebPushTransport};
