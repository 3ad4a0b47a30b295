use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("selection target must be positive, got {0}")]
    NonPositiveTarget(i64),

    #[error("candidate values ({values}) and costs ({costs}) differ in length")]
    LengthMismatch { values: usize, costs: usize },

    #[error("candidate values are not in descending order at position {position}")]
    NotDescending { position: usize },

    #[error("candidate value at position {position} is not positive ({value})")]
    NonPositiveValue { position: usize, value: i64 },

    #[error("maximum input count must be at least one")]
    ZeroInputLimit,
}
