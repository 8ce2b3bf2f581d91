//! Backpressure-aware reactive streams.
//!
//! Pipelines are built from [`Multi`] (zero or more values) and [`Single`] (at most one)
//! producers, composed with operators, and run when subscribed. Subscribers pull values by
//! requesting demand through a [`Subscription`]; nothing is delivered beyond what was asked for.
//! [`bridge`] provides hot multicast hubs and [`Scheduler`] the execution contexts used by
//! `subscribe_on`, `publish_on` and the timed operators.

pub mod bridge;
pub mod config;
pub mod connectable;
pub mod error;
pub mod operators;
pub mod porcelain;
pub mod producer;
pub mod recovery;
pub mod scheduler;
pub mod signal;
pub mod subscriber;
pub mod subscription;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod util;

pub use bridge::{DirectBridge, EmitterBridge, ReplayBridge, Sink, UnicastBridge};
pub use connectable::ConnectableMulti;
pub use error::{DomainError, FlowError, ProtocolViolation, SchedulerError};
pub use operators::GroupedMulti;
pub use producer::{Construction, IntoPublisher, Item, Multi, Publisher, Single, Timing};
pub use recovery::{ContinueStrategy, ErrorBranches};
pub use scheduler::{Scheduler, TaskHandle};
pub use signal::{Signal, Terminal};
pub use subscriber::Disposable;
pub use subscription::{DemandGate, Subscriber, Subscription, SubscriptionState, UNBOUNDED};
