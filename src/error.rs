use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("modulus mismatch")]
    ModulusMismatch,

    #[error("ring degree must be a power of 2, got {0}")]
    InvalidRingDegree(usize),

    #[error("receiver degree {got} is too small, operation requires at least {required}")]
    ReceiverDegreeTooSmall { required: usize, got: usize },

    #[error("combined operand degree {0} exceeds the multiplication pool capacity of 4")]
    MulDegreeTooLarge(usize),

    #[error("ciphertext degree {degree} too large for the evaluation key ({keys} switching keys)")]
    DegreeTooLargeForEvalKey { degree: usize, keys: usize },

    #[error("ciphertext is already of degree 1 or 0, nothing to relinearize")]
    DegreeTooSmallForRelin,

    #[error("key switching requires input and receiver of degree 1, got {0}")]
    KeySwitchDegreeInvalid(usize),

    #[error("cannot rotate: receiver degree doesn't match input degree")]
    RotationDegreeMismatch,

    #[error("cannot rotate: input or output degree not 0 or 1")]
    RotationDegreeOutOfRange,

    #[error("rotation by {0}: neither the specific key nor the full power-of-two key set was generated")]
    RotationKeyMissing(u64),

    #[error("rows rotation key not generated")]
    RowRotationKeyMissing,

    #[error("key not available: {0}")]
    MissingKey(String),
}

pub type Result<T> = std::result::Result<T, TrellisError>;
