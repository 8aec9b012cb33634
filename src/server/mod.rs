//! Client-facing side of the server: sessions, their output queues, the
//! client manager and the main loop

pub mod manager;
pub mod outbox;
pub mod runtime;
pub mod session;

pub use manager::{ClientManager, ManagerSettings};
pub use outbox::{OverflowPolicy, Outbox};
pub use runtime::{Server, ServerBuilder, ServerControl, ServerHandle};
pub use session::{ClientSession, SessionStats, Subscription};
