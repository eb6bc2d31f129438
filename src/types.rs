use crate::error::{Error, Result};
use crate::fields::{FieldVal, IntField, StringField};

/// Payload capacity of a string field, in bytes. Total on-disk width is
/// `STRING_SIZE + 4` (a u32 length prefix).
pub const STRING_SIZE: usize = 128;

/// Only Int and String types are supported.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Type {
    IntType,
    StringType,
}

impl Type {
    /// Size of the type in bytes, on disk.
    pub fn get_len(&self) -> usize {
        match self {
            Type::IntType => 4,
            Type::StringType => STRING_SIZE + 4,
        }
    }

    /// Parses `bytes` (at least `get_len()` long) into a `FieldVal`.
    pub fn parse(&self, bytes: &[u8]) -> Result<FieldVal> {
        match self {
            Type::IntType => {
                let mut int_bytes = [0; 4];
                int_bytes.copy_from_slice(&bytes[..4]);
                Ok(FieldVal::IntField(IntField::new(i32::from_be_bytes(
                    int_bytes,
                ))))
            }
            Type::StringType => {
                let mut len_bytes = [0; 4];
                len_bytes.copy_from_slice(&bytes[..4]);
                let len = u32::from_be_bytes(len_bytes);
                if len as usize > STRING_SIZE {
                    return Err(Error::CatalogParse(format!(
                        "string field length {} exceeds capacity {}",
                        len, STRING_SIZE
                    )));
                }
                let string_bytes = bytes[4..len as usize + 4].to_vec();
                let value = String::from_utf8(string_bytes)
                    .map_err(|e| Error::CatalogParse(e.to_string()))?;
                Ok(FieldVal::StringField(StringField::new(value, len)))
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Type> {
        match name {
            "int" => Some(Type::IntType),
            "string" => Some(Type::StringType),
            _ => None,
        }
    }
}
