pub mod backoff;
pub mod connection;
pub mod router;

pub use connection::{
    ConnectedInfo, ConnectionManager, ConnectionState, MessageHandler, Registration,
};
pub use router::{ActiveSubscription, SubscriptionRouter};
