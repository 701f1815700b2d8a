use thiserror::Error;

use crate::data::model::{ShardAddr, TelluricClass};

/// Errors raised by the telluric calibration core.
///
/// `Precondition`, `InvariantViolation` and `Cancelled` halt a single shard.
/// `DegenerateFit` and `OutOfRangeCluster` are recoverable and end up in the
/// shard's [`crate::telluric::ShardReport`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TelluricError {
    #[error("shard {addr}: {reason}")]
    Precondition { addr: ShardAddr, reason: String },

    #[error(
        "shard {addr}: cluster resolution finished with overlapping {first} and {second} clusters \
         ({first_range} vs {second_range})"
    )]
    InvariantViolation {
        addr: ShardAddr,
        first: TelluricClass,
        second: TelluricClass,
        first_range: String,
        second_range: String,
    },

    #[error("shard {addr}, pixel {pixel}: degenerate {class} regression ({reason})")]
    DegenerateFit {
        addr: ShardAddr,
        pixel: usize,
        class: TelluricClass,
        reason: String,
    },

    #[error("shard {addr}: {class} cluster {start}..={end} clamped to shard bounds")]
    OutOfRangeCluster {
        addr: ShardAddr,
        class: TelluricClass,
        start: usize,
        end: usize,
    },

    #[error("shard {addr}: cancelled before processing")]
    Cancelled { addr: ShardAddr },
}

impl TelluricError {
    /// Whether the error aborts the shard it was raised for.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TelluricError::Precondition { .. }
                | TelluricError::InvariantViolation { .. }
                | TelluricError::Cancelled { .. }
        )
    }
}
