use thiserror::Error;

/// Why a single data line could not be read as its catalog field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("missing '(' value group")]
    MissingValue,
    #[error("unterminated value group")]
    Unterminated,
    #[error("invalid number")]
    InvalidNumber,
    #[error("too many decimals")]
    TooManyDecimals,
    #[error("invalid unit, expected {expected}")]
    InvalidUnit { expected: &'static str },
    #[error("value {value} out of range (max {max})")]
    OutOfRange { value: u64, max: u32 },
    #[error("invalid string length {len}, expected {min}..={max}")]
    StringLength { len: usize, min: usize, max: usize },
    #[error("trailing characters after value")]
    TrailingData,
    #[error("text contains control characters")]
    NotPrintable,
}

/// Telegram-level decode failure. No partial record is ever produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("data should start with /")]
    MissingStartMarker,
    #[error("data should end with !")]
    MissingEndMarker,
    #[error("invalid checksum field")]
    InvalidChecksumField,
    #[error("checksum mismatch: telegram says {expected:04X}, computed {computed:04X}")]
    ChecksumMismatch { expected: u16, computed: u16 },
    #[error("telegram contains non-ASCII data")]
    NotAscii,
    #[error("line {line}: duplicate field {field}")]
    DuplicateField { field: &'static str, line: usize },
    #[error("line {line}: {field}: {source}")]
    Field {
        field: &'static str,
        line: usize,
        #[source]
        source: FieldError,
    },
}

impl DecodeError {
    /// The frame body did not match its trailing checksum, or the checksum
    /// itself was unreadable.
    pub fn is_checksum_error(&self) -> bool {
        matches!(
            self,
            DecodeError::InvalidChecksumField | DecodeError::ChecksumMismatch { .. }
        )
    }

    pub(crate) fn field(field: &'static str, line: usize, source: FieldError) -> Self {
        DecodeError::Field {
            field,
            line,
            source,
        }
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;
