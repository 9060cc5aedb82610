// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system
//
// Coordinator driver code additionally wants to match on _why_ an operation
// failed (unavailable vs. timeout vs. explicit replica failure) without
// downcasting, so `Error` carries an explicit `ErrorKind` alongside the
// opaque backtraced cause. Errors built from foreign `std::error::Error`
// impls (via `From`) get `ErrorKind::Other`; the coordinator crates build
// their own kinds with the constructors below.

use std::borrow::Cow;
use std::fmt;
use backtrace_error::DynBacktraceError;
use tracing::error;

use crate::consistency::WriteType;

#[cfg(test)]
use test_log::test;

#[derive(Clone, Debug)]
pub enum ErrorKind {
    /// Fewer live replicas than the consistency level requires, before any
    /// message was sent.
    Unavailable { required: usize, alive: usize },
    /// Insufficient acknowledgements arrived before the verb's deadline.
    WriteTimeout {
        write_type: WriteType,
        received: usize,
        block_for: usize,
    },
    /// One or more replicas returned an explicit failure response.
    WriteFailure {
        write_type: WriteType,
        received: usize,
        block_for: usize,
        failures: usize,
    },
    /// Symmetric to `WriteTimeout` for reads; `data_present` distinguishes
    /// "missed digest quorum" (true) from "missed the data replica" (false).
    ReadTimeout {
        received: usize,
        block_for: usize,
        data_present: bool,
    },
    ReadFailure {
        received: usize,
        block_for: usize,
        failures: usize,
        data_present: bool,
    },
    /// The hint backpressure cap was breached.
    Overloaded,
    InvalidRequest,
    /// A read for a non-system table while the node is bootstrapping.
    IsBootstrapping,
    /// Surfaced unchanged from the local storage engine.
    TombstoneOverwhelming,
    /// A foreign error with no specific taxonomy entry.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unavailable { required, alive } => {
                write!(f, "unavailable: required {required}, only {alive} alive")
            }
            ErrorKind::WriteTimeout { write_type, received, block_for } => write!(
                f,
                "write timeout ({write_type}): received {received} of {block_for} required"
            ),
            ErrorKind::WriteFailure { write_type, received, block_for, failures } => write!(
                f,
                "write failure ({write_type}): received {received}, {failures} failures, {block_for} required"
            ),
            ErrorKind::ReadTimeout { received, block_for, data_present } => write!(
                f,
                "read timeout: received {received} of {block_for} required (data_present={data_present})"
            ),
            ErrorKind::ReadFailure { received, block_for, failures, data_present } => write!(
                f,
                "read failure: received {received}, {failures} failures, {block_for} required (data_present={data_present})"
            ),
            ErrorKind::Overloaded => write!(f, "overloaded: hint backpressure cap exceeded"),
            ErrorKind::InvalidRequest => write!(f, "invalid request"),
            ErrorKind::IsBootstrapping => write!(f, "node is bootstrapping"),
            ErrorKind::TombstoneOverwhelming => write!(f, "tombstone scan threshold exceeded"),
            ErrorKind::Other => write!(f, "error"),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: DynBacktraceError,
}

pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {
    fn description(&self) -> &str {
        &self.0
    }
}

struct KindedErr(ErrorKind);
impl fmt::Debug for KindedErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.0, self.0)
    }
}
impl fmt::Display for KindedErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for KindedErr {}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Error {
        Error::new(err)
    }
}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
        error!(target: "submerge", "{:?}", err);
        let dbe = DynBacktraceError::from(err);
        Error { kind: ErrorKind::Other, inner: dbe }
    }

    pub fn with_kind(kind: ErrorKind) -> Error {
        error!(target: "submerge", "{}", kind);
        let dbe = DynBacktraceError::from(KindedErr(kind.clone()));
        Error { kind, inner: dbe }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn unavailable(required: usize, alive: usize) -> Error {
        Self::with_kind(ErrorKind::Unavailable { required, alive })
    }

    pub fn write_timeout(write_type: WriteType, received: usize, block_for: usize) -> Error {
        Self::with_kind(ErrorKind::WriteTimeout { write_type, received, block_for })
    }

    pub fn write_failure(write_type: WriteType, received: usize, block_for: usize, failures: usize) -> Error {
        Self::with_kind(ErrorKind::WriteFailure { write_type, received, block_for, failures })
    }

    pub fn read_timeout(received: usize, block_for: usize, data_present: bool) -> Error {
        Self::with_kind(ErrorKind::ReadTimeout { received, block_for, data_present })
    }

    pub fn read_failure(received: usize, block_for: usize, failures: usize, data_present: bool) -> Error {
        Self::with_kind(ErrorKind::ReadFailure { received, block_for, failures, data_present })
    }

    pub fn overloaded() -> Error {
        Self::with_kind(ErrorKind::Overloaded)
    }

    pub fn invalid_request(msg: impl Into<Cow<'static, str>>) -> Error {
        let mut e = Self::with_kind(ErrorKind::InvalidRequest);
        e.inner = DynBacktraceError::from(SimpleErr(msg.into()));
        e
    }

    pub fn is_bootstrapping() -> Error {
        Self::with_kind(ErrorKind::IsBootstrapping)
    }

    pub fn tombstone_overwhelming() -> Error {
        Self::with_kind(ErrorKind::TombstoneOverwhelming)
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    let err = SimpleErr(msg.into());
    Error::new(err)
}

#[test]
fn test_error() {
    let _err = err("test error");
}

#[test]
fn test_kinded_error_round_trips_kind() {
    let e = Error::unavailable(3, 1);
    match e.kind() {
        ErrorKind::Unavailable { required, alive } => {
            assert_eq!(*required, 3);
            assert_eq!(*alive, 1);
        }
        other => panic!("wrong kind: {other:?}"),
    }
}
