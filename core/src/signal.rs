use crate::{error::FlowError, subscription::Subscriber};

/// One step of the signal protocol: any number of `Next`, then at most one terminal signal.
#[derive(Debug, Clone)]
pub enum Signal<T> {
    Next(T),
    Error(FlowError),
    Complete,
}

impl<T> Signal<T> {
    pub fn is_terminal(&self) -> bool { !matches!(self, Signal::Next(_)) }

    pub fn value(&self) -> Option<&T> {
        match self {
            Signal::Next(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Signal::Next(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FlowError> {
        match self {
            Signal::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Short name used by the `log` operator and diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Next(_) => "onNext",
            Signal::Error(_) => "onError",
            Signal::Complete => "onComplete",
        }
    }
}

/// The terminal half of the protocol. Retained by bridges and replayed to late subscribers.
#[derive(Debug, Clone)]
pub enum Terminal {
    Complete,
    Error(FlowError),
}

impl Terminal {
    pub fn deliver<T>(self, subscriber: &dyn Subscriber<T>) {
        match self {
            Terminal::Complete => subscriber.on_complete(),
            Terminal::Error(error) => subscriber.on_error(error),
        }
    }

    pub fn is_error(&self) -> bool { matches!(self, Terminal::Error(_)) }
}

impl<T> From<Terminal> for Signal<T> {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Complete => Signal::Complete,
            Terminal::Error(error) => Signal::Error(error),
        }
    }
}
