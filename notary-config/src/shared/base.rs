use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A numeric field that must be strictly positive was zero.
    #[error("`{0}` must be greater than 0")]
    ZeroValue(&'static str),
    /// A field holds a value outside of what the pipeline supports.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: &'static str,
        constraint: String,
    },
}
