pub mod config;
pub mod crc;
pub mod error;
pub mod fields;
pub mod parser;
pub mod payload;
pub mod reader;
pub mod record;

pub use config::P1Config;
pub use error::{DecodeError, DecodeResult, FieldError};
pub use fields::{FieldId, FieldKind, FieldSelection, FieldSpec, Obis, FIELDS, FIELD_COUNT};
pub use parser::TelegramDecoder;
pub use payload::{Payload, PayloadBuilder};
pub use reader::{
    MemorySerial, RawFrame, ReaderState, ReaderStats, SerialPort, TelegramReader,
    TelegramSource, UnconnectedPin, FRAME_CAPACITY,
};
pub use record::{FieldValue, FixedValue, TelegramRecord, TimestampedFixedValue};
