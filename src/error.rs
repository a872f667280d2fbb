use core::any::Any;
use core::time::Duration;
use thiserror::Error;

/// Payload captured from a panicking task body.
///
/// This is the argument `std::panic::catch_unwind` hands back on failure and
/// the value `std::panic::resume_unwind` re-raises. A node stores at most one
/// of these per execution; see [`crate::node::Node::set_exception`].
pub type Panic = Box<dyn Any + Send + 'static>;

/// Error returned by [`crate::util::ResultSlot::wait_timeout`] when no result
/// was published within the given duration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("result was not published within {timeout:?}")]
pub struct WaitTimeoutError {
    /// The duration that elapsed without a publication.
    pub timeout: Duration,
}
