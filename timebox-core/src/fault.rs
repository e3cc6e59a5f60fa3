//! Faults raised by test actions.
//!
//! A fault carries an explicit [`FaultKind`] tag. Expected-fault matching is a
//! plain equality test on that tag.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Category of a raised fault.
///
/// Every kind has a stable textual tag (see [`FaultKind::tag`]) used on the
/// worker wire and in JSON reports. Unknown tags round-trip as `Custom`.
/// Kinds compare and hash by tag, so `Custom("panic")` equals `Panic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FaultKind {
    /// Integer division or remainder by zero
    DivideByZero,
    /// Arithmetic overflow
    Overflow,
    /// Index or value outside the accepted range
    OutOfRange,
    /// Malformed input argument
    InvalidArgument,
    /// Operation not valid in the current state
    InvalidOperation,
    /// Missing element or resource
    NotFound,
    /// A panic that carried no fault of its own
    Panic,
    /// Caller-defined category
    Custom(String),
}

impl FaultKind {
    /// Stable tag for this kind.
    pub fn tag(&self) -> &str {
        match self {
            FaultKind::DivideByZero => "divide-by-zero",
            FaultKind::Overflow => "overflow",
            FaultKind::OutOfRange => "out-of-range",
            FaultKind::InvalidArgument => "invalid-argument",
            FaultKind::InvalidOperation => "invalid-operation",
            FaultKind::NotFound => "not-found",
            FaultKind::Panic => "panic",
            FaultKind::Custom(tag) => tag,
        }
    }

    /// Caller-defined kind. Tags of built-in kinds yield the built-in variant.
    pub fn custom(tag: impl Into<String>) -> Self {
        FaultKind::from_tag(&tag.into())
    }

    /// Parse a tag produced by [`FaultKind::tag`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "divide-by-zero" => FaultKind::DivideByZero,
            "overflow" => FaultKind::Overflow,
            "out-of-range" => FaultKind::OutOfRange,
            "invalid-argument" => FaultKind::InvalidArgument,
            "invalid-operation" => FaultKind::InvalidOperation,
            "not-found" => FaultKind::NotFound,
            "panic" => FaultKind::Panic,
            other => FaultKind::Custom(other.to_string()),
        }
    }

    /// Map the message of a std arithmetic/indexing panic to its kind.
    fn from_panic_message(message: &str) -> Self {
        if message.starts_with("attempt to divide by zero")
            || message.starts_with("attempt to calculate the remainder with a divisor of zero")
        {
            FaultKind::DivideByZero
        } else if message.starts_with("attempt to") && message.contains("overflow") {
            FaultKind::Overflow
        } else if message.starts_with("index out of bounds") {
            FaultKind::OutOfRange
        } else {
            FaultKind::Panic
        }
    }
}

impl PartialEq for FaultKind {
    fn eq(&self, other: &Self) -> bool {
        self.tag() == other.tag()
    }
}

impl Eq for FaultKind {}

impl Hash for FaultKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<String> for FaultKind {
    fn from(tag: String) -> Self {
        FaultKind::from_tag(&tag)
    }
}

impl From<FaultKind> for String {
    fn from(kind: FaultKind) -> Self {
        kind.tag().to_string()
    }
}

/// A fault raised by a test action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Category, compared against a case's expected fault
    pub kind: FaultKind,
    /// Human-readable message
    pub message: String,
}

impl Fault {
    /// Create a fault.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Raise a fault from arbitrarily deep inside an action by unwinding.
    ///
    /// The executor recovers the fault with its kind intact.
    pub fn raise(kind: FaultKind, message: impl Into<String>) -> ! {
        std::panic::panic_any(Fault::new(kind, message))
    }

    /// Convert a caught panic payload into a fault.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Fault>() {
            Ok(fault) => return *fault,
            Err(payload) => payload,
        };
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        Fault::new(FaultKind::from_panic_message(&message), message)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}
