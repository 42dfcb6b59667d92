//! Typed error hierarchy for the ferry execution layer.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`FerryError::error_code`]
//! for structured telemetry without string parsing.

/// All errors originating from the ferry buffer-orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum FerryError {
    // ── Contract violations (caller bugs, never retried) ─────────────
    #[error("batch size mismatch: input `{name}` has {got} samples, expected {expected}")]
    BatchMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error(
        "staging buffer overflow: requested {requested} bytes at offset {filled}, \
         capacity is {capacity}"
    )]
    StagingOverflow {
        requested: usize,
        filled: usize,
        capacity: usize,
    },

    #[error("cannot grow a staging buffer with {filled} live bytes; clear it first")]
    ReserveWithLiveAllocations { filled: usize },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    // ── Device / copy engine ─────────────────────────────────────────
    #[cfg(feature = "cuda")]
    #[error("CUDA driver error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),

    #[error("copy engine error: {0}")]
    Copy(String),

    #[error("accelerator support is not compiled in — rebuild with the `cuda` feature")]
    AcceleratorUnavailable,

    // ── Pipeline collaborator ────────────────────────────────────────
    #[error("pipeline error: {0}")]
    Pipeline(String),
}

impl FerryError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: contract violations
    /// - 2xx: device / copy engine
    /// - 3xx: pipeline collaborator
    pub fn error_code(&self) -> u32 {
        match self {
            Self::BatchMismatch { .. } => 100,
            Self::StagingOverflow { .. } => 101,
            Self::ReserveWithLiveAllocations { .. } => 102,
            Self::InvalidDescriptor(_) => 103,
            #[cfg(feature = "cuda")]
            Self::Cuda(_) => 200,
            Self::Copy(_) => 201,
            Self::AcceleratorUnavailable => 202,
            Self::Pipeline(_) => 300,
        }
    }

    /// Whether this error indicates a caller-side contract violation
    /// (as opposed to a device or pipeline failure).
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::BatchMismatch { .. }
                | Self::StagingOverflow { .. }
                | Self::ReserveWithLiveAllocations { .. }
                | Self::InvalidDescriptor(_)
        )
    }
}

/// Convenience alias used throughout the ferry crates.
pub type Result<T> = std::result::Result<T, FerryError>;

#[cfg(test)]
mod tests {
    use super::FerryError;

    #[test]
    fn error_codes_are_grouped_by_category() {
        let contract = FerryError::StagingOverflow {
            requested: 10,
            filled: 0,
            capacity: 4,
        };
        let device = FerryError::Copy("bad endpoint".into());
        let pipeline = FerryError::Pipeline("graph failed".into());

        assert_eq!(contract.error_code() / 100, 1);
        assert_eq!(device.error_code() / 100, 2);
        assert_eq!(pipeline.error_code() / 100, 3);
    }

    #[test]
    fn contract_violations_are_classified() {
        assert!(FerryError::BatchMismatch {
            name: "labels".into(),
            expected: 4,
            got: 5,
        }
        .is_contract_violation());
        assert!(!FerryError::Pipeline("boom".into()).is_contract_violation());
    }
}
