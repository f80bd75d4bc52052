use ethereum_types::Address;
use thiserror::Error;

use crate::hub::HubProcessingPhase;
use crate::opcode::OpCode;
use crate::signals::TracedException;

/// Result type returned by every hook and internal operation of the tracer.
pub type TracerResult<T> = Result<T, TracerError>;

/// An internal failure of the tracer.
///
/// These are never the consequence of the traced program misbehaving: EVM
/// level failures (out of gas, stack underflow, ...) are recorded as
/// [`TracedException`]s on the trace. A `TracerError` means the hook sequence
/// or the tracer's own bookkeeping is inconsistent, and the trace produced so
/// far cannot be used.
#[derive(Debug, Error)]
pub enum TracerError {
    /// An internal precondition did not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The gas charged by the host differs from the tracer's projection.
    #[error("gas mismatch for {opcode:?}: tracer computed {tracer}, host charged {host}")]
    GasMismatch {
        opcode: OpCode,
        tracer: u64,
        host: u64,
    },

    /// The host halted (or did not halt) the frame while the tracer computed
    /// the opposite outcome.
    #[error("exception mismatch for {opcode:?}: tracer computed {tracer:?}, host halted: {host_halted}")]
    ExceptionMismatch {
        opcode: OpCode,
        tracer: TracedException,
        host_halted: bool,
    },

    /// A hook was invoked in a processing phase that does not allow it.
    #[error("hook {hook} invoked during {phase:?}")]
    UnexpectedPhase {
        hook: &'static str,
        phase: HubProcessingPhase,
    },

    /// A trace section received more fragments than it budgeted for.
    #[error("trace section of stamp {stamp} exceeded its budget of {max_rows} rows")]
    RowBudgetExceeded { stamp: u32, max_rows: usize },

    /// An account the host reported as touched is unknown to the world view.
    #[error("missing account {0:?} in world view")]
    MissingAccount(Address),

    /// A previous hook failed; the hub refuses any further input.
    #[error("hub is poisoned by an earlier failure")]
    Poisoned,
}

/// Returns early with a [`TracerError::InvariantViolation`] if the condition
/// does not hold.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::TracerError::InvariantViolation(format!($($arg)+)));
        }
    };
}

/// Returns early with a [`TracerError::InvariantViolation`].
#[macro_export]
macro_rules! violation {
    ($($arg:tt)+) => {
        return Err($crate::error::TracerError::InvariantViolation(format!($($arg)+)))
    };
}
