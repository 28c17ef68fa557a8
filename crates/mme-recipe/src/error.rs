use alloc::string::String;
use thiserror::Error;

use crate::components::{GridType, WalkPattern};

/// Errors raised while planning a recipe.
///
/// Every variant is fatal for the workload being planned. Infeasible reuse and single-step
/// grids are regular outcomes and never surface here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecipeError {
    /// A grid was asked to split with a capacity of zero steps.
    #[error("Step capacity must be at least one, got zero for the {grid_type} grid")]
    ZeroStepCapacity {
        /// The grid being created.
        grid_type: GridType,
    },

    /// A split or FCD dimension does not index into the tensor dimensions.
    #[error("Dimension {dim} is out of range, tensors have {max} dimensions")]
    SplitDimOutOfRange {
        /// The offending dimension.
        dim: usize,
        /// Number of tensor dimensions.
        max: usize,
    },

    /// The suspension buffer cannot hold a single atomic unit of the reused operand.
    #[error(
        "Suspension buffer of {sb_elements} elements cannot hold a single atomic unit of the reused operand"
    )]
    SbTooSmall {
        /// Usable SB capacity, in elements.
        sb_elements: u32,
    },

    /// The walk pattern cannot be used with the operation.
    #[error("Walk pattern {pattern} is not supported for this operation")]
    UnsupportedPattern {
        /// The rejected pattern.
        pattern: WalkPattern,
    },

    /// A grid was created twice with different arguments.
    #[error("The {grid_type} grid was already created with different arguments")]
    AlreadyCreated {
        /// The grid being created.
        grid_type: GridType,
    },

    /// A grid was used before being created.
    #[error("The {grid_type} grid is used before being created")]
    NotCreated {
        /// The grid being used.
        grid_type: GridType,
    },

    /// The workload, hardware description or policy is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal consistency check failed.
    #[error("Internal planner invariant violated: {0}")]
    Invariant(String),
}

/// Result type used across the planner.
pub type RecipeResult<T> = Result<T, RecipeError>;

/// Returns [RecipeError::Invariant] with the given message when `condition` is false.
pub(crate) fn ensure(condition: bool, msg: &str) -> RecipeResult<()> {
    if condition {
        Ok(())
    } else {
        Err(RecipeError::Invariant(msg.into()))
    }
}

/// Returns [RecipeError::InvalidConfig] with the given message when `condition` is false.
pub(crate) fn ensure_config(condition: bool, msg: &str) -> RecipeResult<()> {
    if condition {
        Ok(())
    } else {
        Err(RecipeError::InvalidConfig(msg.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_readable() {
        let err = RecipeError::ZeroStepCapacity {
            grid_type: GridType::Fcd,
        };
        assert_eq!(
            err.to_string(),
            "Step capacity must be at least one, got zero for the FCD grid"
        );

        let err = RecipeError::SplitDimOutOfRange { dim: 7, max: 5 };
        assert_eq!(
            err.to_string(),
            "Dimension 7 is out of range, tensors have 5 dimensions"
        );
    }

    #[test]
    fn ensure_maps_to_invariant() {
        assert!(ensure(true, "never").is_ok());
        assert_eq!(
            ensure(false, "broken"),
            Err(RecipeError::Invariant("broken".into()))
        );
        assert_eq!(
            ensure_config(false, "bad"),
            Err(RecipeError::InvalidConfig("bad".into()))
        );
    }
}
