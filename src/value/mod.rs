//! Typed Value Codec
//!
//! Every value stored in the database is a tagged scalar serialized as a
//! deterministic, byte-stable binary blob. The codec owns this wire format,
//! so the on-disk representation never changes due to a dependency upgrade.
//!
//! # Wire format
//!
//! ```text
//! [tag:1][len:u32 LE][payload:len]
//! ```
//!
//! | Variant  | Tag | Payload                               |
//! |----------|-----|---------------------------------------|
//! | `Nil`    | 0   | empty                                 |
//! | `Bool`   | 1   | 1 byte (`0x00` = false, `0x01` = true)|
//! | `I8`     | 2   | 1 byte, two's complement              |
//! | `I16`    | 3   | 2 bytes, little-endian                |
//! | `I32`    | 4   | 4 bytes, little-endian                |
//! | `I64`    | 5   | 8 bytes, little-endian                |
//! | `U8`     | 6   | 1 byte                                |
//! | `U16`    | 7   | 2 bytes, little-endian                |
//! | `U32`    | 8   | 4 bytes, little-endian                |
//! | `U64`    | 9   | 8 bytes, little-endian                |
//! | `F32`    | 10  | 4 bytes, IEEE-754 little-endian       |
//! | `F64`    | 11  | 8 bytes, IEEE-754 little-endian       |
//! | `Str`    | 12  | UTF-8 bytes, no terminator            |
//! | `Bytes`  | 13  | raw bytes                             |
//!
//! # Typed access
//!
//! Decoding is strictly typed: each variant has a matching accessor
//! (`as_bool`, `as_i32`, `as_str`, …) and asking for a type different from
//! the stored tag is a programmer error surfaced as
//! [`ValueError::TypeMismatch`]. The codec is stateless and total on
//! well-formed input; malformed input is rejected with
//! [`ValueError::Corrupt`], never a panic.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use thiserror::Error;

/// Wire-format overhead per value: 1 tag byte plus a 4-byte length prefix.
pub const VALUE_HEADER_SIZE: usize = 1 + 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by value encoding, decoding, and typed access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    /// A typed accessor was invoked on a value holding a different tag.
    #[error("type mismatch: requested {requested}, stored {stored}")]
    TypeMismatch {
        /// Type the caller asked for.
        requested: &'static str,
        /// Type actually stored.
        stored: &'static str,
    },

    /// The input bytes do not form a well-formed value.
    #[error("corrupt value: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Value
// ------------------------------------------------------------------------------------------------

/// A typed scalar value.
///
/// `Value` is the unit of storage for the database: every `put` stores one,
/// every `get` returns one. Numeric payloads are little-endian; strings are
/// UTF-8. Construction from native Rust types goes through the `From`
/// impls, so `db.put("age", 30i32)` works directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The absence of a value (distinct from a deleted key).
    Nil,
    /// A boolean.
    Bool(bool),
    /// An 8-bit signed integer.
    I8(i8),
    /// A 16-bit signed integer.
    I16(i16),
    /// A 32-bit signed integer.
    I32(i32),
    /// A 64-bit signed integer.
    I64(i64),
    /// An 8-bit unsigned integer.
    U8(u8),
    /// A 16-bit unsigned integer.
    U16(u16),
    /// A 32-bit unsigned integer.
    U32(u32),
    /// A 64-bit unsigned integer.
    U64(u64),
    /// A 32-bit IEEE-754 float.
    F32(f32),
    /// A 64-bit IEEE-754 float.
    F64(f64),
    /// A UTF-8 string.
    Str(String),
    /// An opaque byte sequence.
    Bytes(Vec<u8>),
}

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I8: u8 = 2;
const TAG_I16: u8 = 3;
const TAG_I32: u8 = 4;
const TAG_I64: u8 = 5;
const TAG_U8: u8 = 6;
const TAG_U16: u8 = 7;
const TAG_U32: u8 = 8;
const TAG_U64: u8 = 9;
const TAG_F32: u8 = 10;
const TAG_F64: u8 = 11;
const TAG_STR: u8 = 12;
const TAG_BYTES: u8 = 13;

impl Value {
    /// Returns the wire tag of this value.
    pub fn tag(&self) -> u8 {
        match self {
            Value::Nil => TAG_NIL,
            Value::Bool(_) => TAG_BOOL,
            Value::I8(_) => TAG_I8,
            Value::I16(_) => TAG_I16,
            Value::I32(_) => TAG_I32,
            Value::I64(_) => TAG_I64,
            Value::U8(_) => TAG_U8,
            Value::U16(_) => TAG_U16,
            Value::U32(_) => TAG_U32,
            Value::U64(_) => TAG_U64,
            Value::F32(_) => TAG_F32,
            Value::F64(_) => TAG_F64,
            Value::Str(_) => TAG_STR,
            Value::Bytes(_) => TAG_BYTES,
        }
    }

    /// Human-readable name of the stored type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Length in bytes of the serialized payload (without tag and length prefix).
    pub fn payload_size(&self) -> usize {
        match self {
            Value::Nil => 0,
            Value::Bool(_) | Value::I8(_) | Value::U8(_) => 1,
            Value::I16(_) | Value::U16(_) => 2,
            Value::I32(_) | Value::U32(_) | Value::F32(_) => 4,
            Value::I64(_) | Value::U64(_) | Value::F64(_) => 8,
            Value::Str(s) => s.len(),
            Value::Bytes(b) => b.len(),
        }
    }

    /// Total on-wire size: tag + length prefix + payload.
    pub fn encoded_size(&self) -> usize {
        VALUE_HEADER_SIZE + self.payload_size()
    }

    /// Appends the encoded representation of this value to `buf`.
    ///
    /// Encoding is deterministic: the same logical value always yields the
    /// exact same byte sequence.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag());
        buf.extend_from_slice(&(self.payload_size() as u32).to_le_bytes());
        match self {
            Value::Nil => {}
            Value::Bool(v) => buf.push(u8::from(*v)),
            Value::I8(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::U8(v) => buf.push(*v),
            Value::U16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::U32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::U64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::F32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::F64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Str(s) => buf.extend_from_slice(s.as_bytes()),
            Value::Bytes(b) => buf.extend_from_slice(b),
        }
    }

    /// Encodes this value into a freshly-allocated buffer.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        self.encode_to(&mut buf);
        buf
    }

    /// Decodes one value starting at `buf[0]`.
    ///
    /// Returns `(value, bytes_consumed)` so callers can advance a cursor
    /// through a buffer containing multiple encoded items.
    pub fn decode_from(buf: &[u8]) -> Result<(Self, usize), ValueError> {
        if buf.len() < VALUE_HEADER_SIZE {
            return Err(ValueError::Corrupt(format!(
                "value header needs {} bytes, have {}",
                VALUE_HEADER_SIZE,
                buf.len()
            )));
        }

        let tag = buf[0];
        let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        let payload = &buf[VALUE_HEADER_SIZE..];
        if payload.len() < len {
            return Err(ValueError::Corrupt(format!(
                "value payload needs {len} bytes, have {}",
                payload.len()
            )));
        }
        let payload = &payload[..len];

        let value = match tag {
            TAG_NIL => {
                expect_len(tag, len, 0)?;
                Value::Nil
            }
            TAG_BOOL => {
                expect_len(tag, len, 1)?;
                match payload[0] {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    other => {
                        return Err(ValueError::Corrupt(format!("invalid bool byte 0x{other:02x}")));
                    }
                }
            }
            TAG_I8 => {
                expect_len(tag, len, 1)?;
                Value::I8(payload[0] as i8)
            }
            TAG_I16 => {
                expect_len(tag, len, 2)?;
                Value::I16(i16::from_le_bytes([payload[0], payload[1]]))
            }
            TAG_I32 => {
                expect_len(tag, len, 4)?;
                Value::I32(i32::from_le_bytes(fixed(payload)))
            }
            TAG_I64 => {
                expect_len(tag, len, 8)?;
                Value::I64(i64::from_le_bytes(fixed(payload)))
            }
            TAG_U8 => {
                expect_len(tag, len, 1)?;
                Value::U8(payload[0])
            }
            TAG_U16 => {
                expect_len(tag, len, 2)?;
                Value::U16(u16::from_le_bytes([payload[0], payload[1]]))
            }
            TAG_U32 => {
                expect_len(tag, len, 4)?;
                Value::U32(u32::from_le_bytes(fixed(payload)))
            }
            TAG_U64 => {
                expect_len(tag, len, 8)?;
                Value::U64(u64::from_le_bytes(fixed(payload)))
            }
            TAG_F32 => {
                expect_len(tag, len, 4)?;
                Value::F32(f32::from_le_bytes(fixed(payload)))
            }
            TAG_F64 => {
                expect_len(tag, len, 8)?;
                Value::F64(f64::from_le_bytes(fixed(payload)))
            }
            TAG_STR => {
                let s = std::str::from_utf8(payload)
                    .map_err(|e| ValueError::Corrupt(format!("invalid UTF-8 in string: {e}")))?;
                Value::Str(s.to_string())
            }
            TAG_BYTES => Value::Bytes(payload.to_vec()),
            other => return Err(ValueError::Corrupt(format!("unknown value tag {other}"))),
        };

        Ok((value, VALUE_HEADER_SIZE + len))
    }
}

/// Rejects a fixed-width payload whose declared length does not match the tag.
fn expect_len(tag: u8, actual: usize, expected: usize) -> Result<(), ValueError> {
    if actual != expected {
        return Err(ValueError::Corrupt(format!(
            "tag {tag} expects {expected}-byte payload, declared {actual}"
        )));
    }
    Ok(())
}

/// Copies a payload slice into a fixed-size array.
///
/// Callers have already validated `payload.len() == N` via [`expect_len`].
fn fixed<const N: usize>(payload: &[u8]) -> [u8; N] {
    let mut arr = [0u8; N];
    arr.copy_from_slice(&payload[..N]);
    arr
}

// ------------------------------------------------------------------------------------------------
// Typed accessors
// ------------------------------------------------------------------------------------------------

macro_rules! accessor {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ty, $type_name:literal) => {
        $(#[$doc])*
        pub fn $name(&self) -> Result<$ty, ValueError> {
            match self {
                Value::$variant(v) => Ok(*v),
                other => Err(ValueError::TypeMismatch {
                    requested: $type_name,
                    stored: other.type_name(),
                }),
            }
        }
    };
}

impl Value {
    /// Returns `true` if this value is `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    accessor!(
        /// Returns the stored boolean, or `TypeMismatch` for any other tag.
        as_bool, Bool, bool, "bool"
    );
    accessor!(
        /// Returns the stored `i8`, or `TypeMismatch` for any other tag.
        as_i8, I8, i8, "i8"
    );
    accessor!(
        /// Returns the stored `i16`, or `TypeMismatch` for any other tag.
        as_i16, I16, i16, "i16"
    );
    accessor!(
        /// Returns the stored `i32`, or `TypeMismatch` for any other tag.
        as_i32, I32, i32, "i32"
    );
    accessor!(
        /// Returns the stored `i64`, or `TypeMismatch` for any other tag.
        as_i64, I64, i64, "i64"
    );
    accessor!(
        /// Returns the stored `u8`, or `TypeMismatch` for any other tag.
        as_u8, U8, u8, "u8"
    );
    accessor!(
        /// Returns the stored `u16`, or `TypeMismatch` for any other tag.
        as_u16, U16, u16, "u16"
    );
    accessor!(
        /// Returns the stored `u32`, or `TypeMismatch` for any other tag.
        as_u32, U32, u32, "u32"
    );
    accessor!(
        /// Returns the stored `u64`, or `TypeMismatch` for any other tag.
        as_u64, U64, u64, "u64"
    );
    accessor!(
        /// Returns the stored `f32`, or `TypeMismatch` for any other tag.
        as_f32, F32, f32, "f32"
    );
    accessor!(
        /// Returns the stored `f64`, or `TypeMismatch` for any other tag.
        as_f64, F64, f64, "f64"
    );

    /// Returns the stored string slice, or `TypeMismatch` for any other tag.
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(ValueError::TypeMismatch {
                requested: "string",
                stored: other.type_name(),
            }),
        }
    }

    /// Returns the stored byte slice, or `TypeMismatch` for any other tag.
    pub fn as_bytes(&self) -> Result<&[u8], ValueError> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(ValueError::TypeMismatch {
                requested: "bytes",
                stored: other.type_name(),
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// From impls — one constructor per supported scalar type
// ------------------------------------------------------------------------------------------------

macro_rules! from_impl {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

from_impl!(bool, Bool);
from_impl!(i8, I8);
from_impl!(i16, I16);
from_impl!(i32, I32);
from_impl!(i64, I64);
from_impl!(u8, U8);
from_impl!(u16, U16);
from_impl!(u32, U32);
from_impl!(u64, U64);
from_impl!(f32, F32);
from_impl!(f64, F64);
from_impl!(String, Str);
from_impl!(Vec<u8>, Bytes);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Value {
    fn from(v: [u8; N]) -> Self {
        Value::Bytes(v.to_vec())
    }
}
