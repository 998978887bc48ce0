//! # Big-Endian Key Encoding
//!
//! This module provides byte-comparable value encoding for arbordb's ordered
//! trees. All encoded keys can be compared with a single `memcmp`, so hkey
//! prefix tests, index range scans, and sort keys never need type-specific
//! comparison logic.
//!
//! ## Design Goals
//!
//! 1. **Byte-comparable**: encoded values preserve sort order lexicographically
//! 2. **Self-delimiting**: a value's length is recoverable from its bytes,
//!    so composite keys concatenate without separators
//! 3. **Deterministic**: the same value always produces the same bytes
//! 4. **Invertible**: every encoding decodes back to the original value
//!
//! ## Type Prefix Scheme
//!
//! Each encoded value starts with a prefix byte that orders values of
//! different classes:
//!
//! ```text
//! 0x01       NULL
//! 0x11-0x17  Numbers (negatives < ZERO < positives; wide decimals split
//!            onto the BIG prefixes)
//! 0x20-0x21  TEXT < BLOB
//! 0x30-0x32  DATE, TIMESTAMP
//! 0xFF       MAX_KEY (range sentinel, never stored)
//! ```
//!
//! ## Number Encoding Strategy
//!
//! Integers use a sign-split encoding: negatives carry the complemented
//! magnitude under the NEG_INT prefix, zero is the ZERO prefix alone, and
//! positives carry the big-endian magnitude under POS_INT. This yields
//! -100 < -1 < 0 < 1 < 100 without variable-length tricks.
//!
//! Floats rely on IEEE 754 bit manipulation: negative values invert all
//! bits, positive values flip the sign bit. Decimals ride on the BIG_INT
//! prefixes as a sign-bit-flipped 128-bit scaled integer, with the scale
//! byte ahead of the digits (constant per column, so order is unaffected).
//!
//! ## Text Encoding Strategy
//!
//! Text and binary payloads escape embedded terminator bytes:
//!
//! ```text
//! 0x00 -> 0x00 0xFF
//! 0xFF -> 0xFF 0x00
//! terminator: 0x00 0x00
//! ```
//!
//! Embedded nulls survive, lexicographic order is preserved, and the empty
//! string sorts before every non-empty string.

use eyre::{bail, Result};

use crate::error::Fault;
use crate::types::{FieldType, Value};

pub mod type_prefix {
    pub const NULL: u8 = 0x01;

    pub const NEG_BIG_INT: u8 = 0x11;
    pub const NEG_INT: u8 = 0x12;
    pub const NEG_FLOAT: u8 = 0x13;
    pub const ZERO: u8 = 0x14;
    pub const POS_FLOAT: u8 = 0x15;
    pub const POS_INT: u8 = 0x16;
    pub const POS_BIG_INT: u8 = 0x17;

    pub const TEXT: u8 = 0x20;
    pub const BLOB: u8 = 0x21;

    pub const DATE: u8 = 0x30;
    pub const TIMESTAMP: u8 = 0x32;

    pub const MAX_KEY: u8 = 0xFF;
}

const SIGN_BIT_64: u64 = 1 << 63;
const SIGN_BIT_128: u128 = 1 << 127;

pub fn encode_null(buf: &mut Vec<u8>) {
    buf.push(type_prefix::NULL);
}

pub fn encode_i64(value: i64, buf: &mut Vec<u8>) {
    if value == 0 {
        buf.push(type_prefix::ZERO);
    } else if value > 0 {
        buf.push(type_prefix::POS_INT);
        buf.extend((value as u64).to_be_bytes());
    } else {
        let magnitude = (-(value as i128)) as u64;
        buf.push(type_prefix::NEG_INT);
        buf.extend((!magnitude).to_be_bytes());
    }
}

pub fn encode_u64(value: u64, buf: &mut Vec<u8>) {
    if value == 0 {
        buf.push(type_prefix::ZERO);
    } else {
        buf.push(type_prefix::POS_INT);
        buf.extend(value.to_be_bytes());
    }
}

pub fn encode_f64(value: f64, buf: &mut Vec<u8>) {
    if value == 0.0 {
        buf.push(type_prefix::ZERO);
        return;
    }
    let bits = value.to_bits();
    if value < 0.0 {
        buf.push(type_prefix::NEG_FLOAT);
        buf.extend((!bits).to_be_bytes());
    } else {
        buf.push(type_prefix::POS_FLOAT);
        buf.extend((bits ^ SIGN_BIT_64).to_be_bytes());
    }
}

pub fn encode_decimal(digits: i128, scale: u8, buf: &mut Vec<u8>) {
    buf.push(if digits < 0 {
        type_prefix::NEG_BIG_INT
    } else {
        type_prefix::POS_BIG_INT
    });
    buf.push(scale);
    buf.extend(((digits as u128) ^ SIGN_BIT_128).to_be_bytes());
}

pub fn encode_date(days: i32, buf: &mut Vec<u8>) {
    buf.push(type_prefix::DATE);
    buf.extend(((days as u32) ^ 0x8000_0000).to_be_bytes());
}

pub fn encode_timestamp(micros: i64, buf: &mut Vec<u8>) {
    buf.push(type_prefix::TIMESTAMP);
    buf.extend(((micros as u64) ^ SIGN_BIT_64).to_be_bytes());
}

fn encode_escaped(data: &[u8], buf: &mut Vec<u8>) {
    for &b in data {
        match b {
            0x00 => buf.extend([0x00, 0xFF]),
            0xFF => buf.extend([0xFF, 0x00]),
            _ => buf.push(b),
        }
    }
    buf.extend([0x00, 0x00]);
}

pub fn encode_text(text: &str, buf: &mut Vec<u8>) {
    buf.push(type_prefix::TEXT);
    encode_escaped(text.as_bytes(), buf);
}

pub fn encode_bytes(data: &[u8], buf: &mut Vec<u8>) {
    buf.push(type_prefix::BLOB);
    encode_escaped(data, buf);
}

pub fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => encode_null(buf),
        Value::Int32(v) => encode_i64(*v as i64, buf),
        Value::Int64(v) => encode_i64(*v, buf),
        Value::Uint64(v) => encode_u64(*v, buf),
        Value::Float64(v) => encode_f64(*v, buf),
        Value::Decimal { digits, scale } => encode_decimal(*digits, *scale, buf),
        Value::Date(days) => encode_date(*days, buf),
        Value::Timestamp(micros) => encode_timestamp(*micros, buf),
        Value::Text(s) => encode_text(s, buf),
        Value::Bytes(b) => encode_bytes(b, buf),
    }
}

/// Byte length of the encoded value at the head of `buf`, without decoding.
pub fn skip_value(buf: &[u8]) -> Result<usize> {
    let Some(&prefix) = buf.first() else {
        bail!(Fault::CorruptRow {
            reason: "empty encoded value".into(),
        });
    };
    let len = match prefix {
        type_prefix::NULL | type_prefix::ZERO => 1,
        type_prefix::NEG_INT
        | type_prefix::POS_INT
        | type_prefix::NEG_FLOAT
        | type_prefix::POS_FLOAT
        | type_prefix::TIMESTAMP => 9,
        type_prefix::DATE => 5,
        type_prefix::NEG_BIG_INT | type_prefix::POS_BIG_INT => 18,
        type_prefix::TEXT | type_prefix::BLOB => 1 + escaped_len(&buf[1..])?,
        other => bail!(Fault::CorruptRow {
            reason: format!("unknown key type prefix {other:#04x}"),
        }),
    };
    if buf.len() < len {
        bail!(Fault::CorruptRow {
            reason: "truncated encoded value".into(),
        });
    }
    Ok(len)
}

fn escaped_len(buf: &[u8]) -> Result<usize> {
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            0x00 => {
                if i + 1 >= buf.len() {
                    break;
                }
                if buf[i + 1] == 0x00 {
                    return Ok(i + 2);
                }
                i += 2;
            }
            0xFF => i += 2,
            _ => i += 1,
        }
    }
    bail!(Fault::CorruptRow {
        reason: "unterminated escaped payload".into(),
    })
}

fn decode_escaped(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        if i >= buf.len() {
            bail!(Fault::CorruptRow {
                reason: "unterminated escaped payload".into(),
            });
        }
        match buf[i] {
            0x00 => {
                if i + 1 >= buf.len() {
                    bail!(Fault::CorruptRow {
                        reason: "dangling escape byte".into(),
                    });
                }
                match buf[i + 1] {
                    0x00 => return Ok((out, i + 2)),
                    0xFF => {
                        out.push(0x00);
                        i += 2;
                    }
                    other => bail!(Fault::CorruptRow {
                        reason: format!("bad escape sequence 00 {other:02x}"),
                    }),
                }
            }
            0xFF => {
                if i + 1 >= buf.len() || buf[i + 1] != 0x00 {
                    bail!(Fault::CorruptRow {
                        reason: "bad escape sequence after ff".into(),
                    });
                }
                out.push(0xFF);
                i += 2;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
}

fn take<const N: usize>(buf: &[u8], at: usize) -> Result<[u8; N]> {
    let Some(slice) = buf.get(at..at + N) else {
        bail!(Fault::CorruptRow {
            reason: "truncated encoded value".into(),
        });
    };
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn decode_integer(buf: &[u8]) -> Result<(i128, usize)> {
    match buf.first() {
        Some(&type_prefix::ZERO) => Ok((0, 1)),
        Some(&type_prefix::POS_INT) => {
            let magnitude = u64::from_be_bytes(take::<8>(buf, 1)?);
            Ok((magnitude as i128, 9))
        }
        Some(&type_prefix::NEG_INT) => {
            let magnitude = !u64::from_be_bytes(take::<8>(buf, 1)?);
            Ok((-(magnitude as i128), 9))
        }
        other => bail!(Fault::CorruptRow {
            reason: format!("expected integer prefix, found {other:?}"),
        }),
    }
}

/// Decodes the value at the head of `buf` as the given field type, returning
/// the value and the number of bytes consumed.
pub fn decode_value(buf: &[u8], ty: &FieldType) -> Result<(Value, usize)> {
    if buf.first() == Some(&type_prefix::NULL) {
        return Ok((Value::Null, 1));
    }
    match ty {
        FieldType::Int32 => {
            let (v, n) = decode_integer(buf)?;
            let v = i32::try_from(v).map_err(|_| Fault::CorruptRow {
                reason: "int32 key value out of range".into(),
            })?;
            Ok((Value::Int32(v), n))
        }
        FieldType::Int64 => {
            let (v, n) = decode_integer(buf)?;
            let v = i64::try_from(v).map_err(|_| Fault::CorruptRow {
                reason: "int64 key value out of range".into(),
            })?;
            Ok((Value::Int64(v), n))
        }
        FieldType::Uint64 => {
            let (v, n) = decode_integer(buf)?;
            let v = u64::try_from(v).map_err(|_| Fault::CorruptRow {
                reason: "uint64 key value out of range".into(),
            })?;
            Ok((Value::Uint64(v), n))
        }
        FieldType::Float64 => match buf.first() {
            Some(&type_prefix::ZERO) => Ok((Value::Float64(0.0), 1)),
            Some(&type_prefix::POS_FLOAT) => {
                let bits = u64::from_be_bytes(take::<8>(buf, 1)?) ^ SIGN_BIT_64;
                Ok((Value::Float64(f64::from_bits(bits)), 9))
            }
            Some(&type_prefix::NEG_FLOAT) => {
                let bits = !u64::from_be_bytes(take::<8>(buf, 1)?);
                Ok((Value::Float64(f64::from_bits(bits)), 9))
            }
            other => bail!(Fault::CorruptRow {
                reason: format!("expected float prefix, found {other:?}"),
            }),
        },
        FieldType::Decimal { .. } => match buf.first() {
            Some(&type_prefix::NEG_BIG_INT) | Some(&type_prefix::POS_BIG_INT) => {
                let scale = *buf.get(1).ok_or_else(|| Fault::CorruptRow {
                    reason: "truncated decimal key".into(),
                })?;
                let digits = (u128::from_be_bytes(take::<16>(buf, 2)?) ^ SIGN_BIT_128) as i128;
                Ok((Value::Decimal { digits, scale }, 18))
            }
            other => bail!(Fault::CorruptRow {
                reason: format!("expected decimal prefix, found {other:?}"),
            }),
        },
        FieldType::Date => match buf.first() {
            Some(&type_prefix::DATE) => {
                let days = (u32::from_be_bytes(take::<4>(buf, 1)?) ^ 0x8000_0000) as i32;
                Ok((Value::Date(days), 5))
            }
            other => bail!(Fault::CorruptRow {
                reason: format!("expected date prefix, found {other:?}"),
            }),
        },
        FieldType::Timestamp => match buf.first() {
            Some(&type_prefix::TIMESTAMP) => {
                let micros = (u64::from_be_bytes(take::<8>(buf, 1)?) ^ SIGN_BIT_64) as i64;
                Ok((Value::Timestamp(micros), 9))
            }
            other => bail!(Fault::CorruptRow {
                reason: format!("expected timestamp prefix, found {other:?}"),
            }),
        },
        FieldType::Varchar { .. } => match buf.first() {
            Some(&type_prefix::TEXT) => {
                let (bytes, n) = decode_escaped(&buf[1..])?;
                let text = String::from_utf8(bytes).map_err(|_| Fault::CorruptRow {
                    reason: "non-utf8 text key payload".into(),
                })?;
                Ok((Value::Text(text), 1 + n))
            }
            other => bail!(Fault::CorruptRow {
                reason: format!("expected text prefix, found {other:?}"),
            }),
        },
        FieldType::Varbinary { .. } => match buf.first() {
            Some(&type_prefix::BLOB) => {
                let (bytes, n) = decode_escaped(&buf[1..])?;
                Ok((Value::Bytes(bytes), 1 + n))
            }
            other => bail!(Fault::CorruptRow {
                reason: format!("expected blob prefix, found {other:?}"),
            }),
        },
    }
}
