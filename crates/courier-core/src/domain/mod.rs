//! Domain model (patterns, envelopes, outcomes, errors).

pub mod envelope;
pub mod errors;
pub mod outcome;
pub mod pattern;

pub use self::envelope::Envelope;
pub use self::errors::{
    BusError, DispatchError, ErrorKind, HandlerError, RegistryError, RunnerError,
};
pub use self::outcome::Outcome;
pub use self::pattern::{COMPLETED_SUFFIX, ERROR_SUFFIX, Pattern, WILDCARD};
