//! Multicast bridges: hot hubs that accept pushed signals and fan them out to subscribers.
//!
//! Every bridge is both a [`Sink`] (push values by hand) and a [`Subscriber`](crate::Subscriber)
//! (subscribe it to a producer, which it drains with unbounded demand). They differ in how
//! they treat demand and late subscribers:
//!
//! | Bridge | Subscribers | Buffering | Late subscriber sees |
//! |---|---|---|---|
//! | [`DirectBridge`] | many | none | the terminal signal only |
//! | [`UnicastBridge`] | one | unbounded (or capped) queue | rejected |
//! | [`EmitterBridge`] | many | bounded queue per subscriber | values pushed after it attached, or the held backlog if it is the first |
//! | [`ReplayBridge`] | many | bounded or unbounded history | retained history, then live |
//!
//! The first terminal signal is retained and replayed to anyone subscribing afterwards.
//! Pushing after termination does nothing. Pushes may come from several threads: no
//! subscriber ever sees a value after the terminal signal.

use crate::error::{FlowError, ProtocolViolation};

/// Message-style input side of a bridge
pub trait Sink<T> {
    fn next(&self, value: T) -> Result<(), ProtocolViolation>;
    fn error(&self, error: FlowError) -> Result<(), ProtocolViolation>;
    fn complete(&self) -> Result<(), ProtocolViolation>;
}

/// Implements `Subscriber` for a bridge by forwarding to its `Sink` side. The bridge keeps
/// its upstream in `self.0.upstream` and drains it without limit.
macro_rules! sink_subscriber {
    ($bridge:ident $(, $bound:path)*) => {
        impl<T: crate::producer::Item $(+ $bound)*> crate::subscription::Subscriber<T> for $bridge<T> {
            fn on_subscribe(&self, subscription: std::sync::Arc<dyn crate::subscription::Subscription>) {
                use crate::subscription::Subscription as _;
                if self.0.upstream.set(subscription) {
                    self.0.upstream.request(crate::subscription::UNBOUNDED);
                }
            }

            fn on_next(&self, value: T) { let _ = crate::bridge::Sink::next(self, value); }

            fn on_error(&self, error: crate::error::FlowError) { let _ = crate::bridge::Sink::error(self, error); }

            fn on_complete(&self) { let _ = crate::bridge::Sink::complete(self); }
        }
    };
}

pub(crate) use sink_subscriber;

mod direct;
mod emitter;
mod replay;
mod unicast;

pub use direct::DirectBridge;
pub use emitter::EmitterBridge;
pub use replay::ReplayBridge;
pub use unicast::UnicastBridge;
