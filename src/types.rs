//! # Field Types and Values
//!
//! The type system this tier stores. It is deliberately small: the adapter
//! encodes whatever the layers above already bound and type-checked, so only
//! storage-relevant properties matter here: fixed width, variable-length
//! prefix sizing, and declared character set.
//!
//! ## Width Rules
//!
//! | Type        | Width                                        |
//! |-------------|----------------------------------------------|
//! | Int32/Date  | 4 bytes                                      |
//! | Int64/Uint64/Float64/Timestamp | 8 bytes                   |
//! | Decimal     | 4, 8, or 16 bytes by declared precision      |
//! | Varchar/Varbinary | length prefix sized by declared maximum |
//!
//! Decimals are stored as a scaled two's-complement integer: a declared
//! precision of up to 9 digits fits 4 bytes, up to 18 fits 8, anything
//! larger takes 16.

/// Supported character sets for `Varchar` columns. Anything else is rejected
/// at schema build with a fault naming the offending column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    Utf8,
    Ascii,
    Latin1,
}

impl Charset {
    /// Parses a declared charset name; `None` means unsupported.
    pub fn parse(name: &str) -> Option<Charset> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Some(Charset::Utf8),
            "ascii" | "us-ascii" => Some(Charset::Ascii),
            "latin1" | "latin-1" | "iso-8859-1" => Some(Charset::Latin1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    Uint64,
    Float64,
    Decimal { precision: u8, scale: u8 },
    Date,
    Timestamp,
    Varchar { max_len: u32, charset: Charset },
    Varbinary { max_len: u32 },
}

impl FieldType {
    /// Encoded width for fixed-width types; `None` for variable-length.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldType::Int32 | FieldType::Date => Some(4),
            FieldType::Int64 | FieldType::Uint64 | FieldType::Float64 | FieldType::Timestamp => {
                Some(8)
            }
            FieldType::Decimal { precision, .. } => Some(Self::decimal_width(*precision)),
            FieldType::Varchar { .. } | FieldType::Varbinary { .. } => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.fixed_width().is_none()
    }

    pub fn decimal_width(precision: u8) -> usize {
        if precision <= 9 {
            4
        } else if precision <= 18 {
            8
        } else {
            16
        }
    }

    /// Width of the length prefix preceding a variable-length payload,
    /// chosen from the column's declared maximum.
    pub fn var_prefix_width(&self) -> Option<u8> {
        let max_len = match self {
            FieldType::Varchar { max_len, .. } => *max_len,
            FieldType::Varbinary { max_len } => *max_len,
            _ => return None,
        };
        Some(if max_len < 0x100 {
            1
        } else if max_len < 0x1_0000 {
            2
        } else {
            4
        })
    }

    pub fn declared_max_len(&self) -> Option<u32> {
        match self {
            FieldType::Varchar { max_len, .. } => Some(*max_len),
            FieldType::Varbinary { max_len } => Some(*max_len),
            _ => None,
        }
    }
}

/// A decoded field value. `Null` is a legitimate SQL NULL; an unbound field
/// is not a value at all and surfaces as a distinct fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    Decimal { digits: i128, scale: u8 },
    Date(i32),
    Timestamp(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_width_follows_precision() {
        assert_eq!(FieldType::decimal_width(1), 4);
        assert_eq!(FieldType::decimal_width(9), 4);
        assert_eq!(FieldType::decimal_width(10), 8);
        assert_eq!(FieldType::decimal_width(18), 8);
        assert_eq!(FieldType::decimal_width(19), 16);
        assert_eq!(FieldType::decimal_width(38), 16);
    }

    #[test]
    fn var_prefix_width_follows_declared_maximum() {
        let short = FieldType::Varchar {
            max_len: 255,
            charset: Charset::Utf8,
        };
        let medium = FieldType::Varbinary { max_len: 256 };
        let long = FieldType::Varchar {
            max_len: 70_000,
            charset: Charset::Utf8,
        };
        assert_eq!(short.var_prefix_width(), Some(1));
        assert_eq!(medium.var_prefix_width(), Some(2));
        assert_eq!(long.var_prefix_width(), Some(4));
        assert_eq!(FieldType::Int64.var_prefix_width(), None);
    }

    #[test]
    fn charset_parse_accepts_aliases_and_rejects_the_rest() {
        assert_eq!(Charset::parse("UTF-8"), Some(Charset::Utf8));
        assert_eq!(Charset::parse("us-ascii"), Some(Charset::Ascii));
        assert_eq!(Charset::parse("ISO-8859-1"), Some(Charset::Latin1));
        assert_eq!(Charset::parse("EBCDIC"), None);
    }
}
