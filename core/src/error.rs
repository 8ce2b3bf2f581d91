//! Error types carried by the error signal.
//!
//! Two families travel through a pipeline. Domain errors come from user code (transforms,
//! callables, factories) and can be intercepted by the recovery operators. Protocol faults
//! mean the engine itself was misused; recovery operators pass them through untouched.

use std::{any::Any, fmt, sync::Arc, time::Duration};
use thiserror::Error;

/// Payload of the error signal.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// Raised by user-supplied code
    #[error("{0}")]
    Domain(DomainError),

    /// The subscription protocol was violated
    #[error("protocol violation: {0}")]
    Protocol(ProtocolViolation),

    /// No signal arrived within the window of a `timeout` operator
    #[error("no signal within {0:?}")]
    Timeout(Duration),
}

impl FlowError {
    /// Wraps a user error. A `FlowError` passed in is returned as-is rather than nested.
    pub fn domain<E>(error: E) -> Self
    where E: std::error::Error + Send + Sync + 'static {
        if let Some(flow) = (&error as &dyn Any).downcast_ref::<FlowError>() {
            return flow.clone();
        }
        FlowError::Domain(DomainError::new(error))
    }

    /// Ad-hoc domain error from a message
    pub fn msg(message: impl Into<String>) -> Self { FlowError::Domain(DomainError::new(Message(message.into()))) }

    /// True when this is a domain error of type `E`
    pub fn is<E>(&self) -> bool
    where E: std::error::Error + 'static {
        matches!(self, FlowError::Domain(domain) if domain.is::<E>())
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where E: std::error::Error + 'static {
        match self {
            FlowError::Domain(domain) => domain.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_protocol(&self) -> bool { matches!(self, FlowError::Protocol(_)) }

    pub fn protocol(&self) -> Option<&ProtocolViolation> {
        match self {
            FlowError::Protocol(violation) => Some(violation),
            _ => None,
        }
    }

    /// Whether recovery operators may intercept this error
    pub fn is_recoverable(&self) -> bool { !self.is_protocol() }
}

impl From<ProtocolViolation> for FlowError {
    fn from(violation: ProtocolViolation) -> Self { FlowError::Protocol(violation) }
}

impl From<DomainError> for FlowError {
    fn from(error: DomainError) -> Self { FlowError::Domain(error) }
}

/// A user error, shared so that bridges can replay it to every subscriber.
#[derive(Clone)]
pub struct DomainError(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl DomainError {
    pub fn new<E>(error: E) -> Self
    where E: std::error::Error + Send + Sync + 'static {
        Self(Arc::new(error))
    }

    pub fn is<E>(&self) -> bool
    where E: std::error::Error + 'static {
        self.0.is::<E>()
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where E: std::error::Error + 'static {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(&*self.0, f) }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(&*self.0, f) }
}

impl std::error::Error for DomainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { self.0.source() }
}

/// Plain-text domain error created by [`FlowError::msg`]
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Message(pub String);

/// Engine misuse. Never intercepted by domain recovery operators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A value was pushed to a subscriber with no outstanding demand
    #[error("could not emit value due to lack of requests")]
    MissingDemand,

    /// A second subscriber attached to a single-subscriber producer
    #[error("{0} allows only a single subscriber")]
    SingleSubscriber(&'static str),

    /// A signal was pushed after the terminal signal
    #[error("signal pushed after termination")]
    Terminated,

    /// A bounded buffer could not accept another value
    #[error("buffer of {0} values overflowed")]
    BufferOverflow(usize),
}

/// A worker pool could not be started
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to start worker pool {name}: {source}")]
    Start {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
