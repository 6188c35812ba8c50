pub mod backoff;
pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod frame;
pub mod publisher;
pub mod registry;
pub mod transport;

pub use backoff::{Backoff, ReconnectPolicy};
pub use client::{ChatClient, ConnectionState, TransportSettings};
pub use dispatcher::Dispatcher;
pub use frame::{Command, Frame, Heartbeat};
pub use publisher::Publisher;
pub use registry::{MessageCallback, SubscriptionRegistry};
pub use transport::{FrameSink, Link};
