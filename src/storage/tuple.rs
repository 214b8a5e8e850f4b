use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::catalog::schema::{DataType, Schema};
use crate::common::config::Timestamp;
use crate::common::error::{Result, StorageError};

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Boolean(bool),
    Int(i32),
    BigInt(i64),
    Decimal(f64),
    Varchar(String),
}

impl Datum {
    pub fn data_type(&self) -> DataType {
        match self {
            Datum::Boolean(_) => DataType::Boolean,
            Datum::Int(_) => DataType::Int,
            Datum::BigInt(_) => DataType::BigInt,
            Datum::Decimal(_) => DataType::Decimal,
            Datum::Varchar(_) => DataType::Varchar,
        }
    }
}

/// Row versioning metadata kept next to every tuple. The timestamp is either
/// a commit timestamp or a writer's temp stamp, see `TXN_START_ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    pub ts: Timestamp,
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn new(ts: Timestamp, is_deleted: bool) -> Self {
        Self { ts, is_deleted }
    }
}

/// In-memory row: one datum per schema column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuple {
    values: Vec<Datum>,
}

impl Tuple {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn value(&self, idx: usize) -> &Datum {
        &self.values[idx]
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn set_value(&mut self, idx: usize, value: Datum) {
        self.values[idx] = value;
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Serialises values in schema order. Fixed types use their native
    /// little endian width, varchars a u32 length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for value in &self.values {
            match value {
                Datum::Boolean(v) => buf.put_u8(*v as u8),
                Datum::Int(v) => buf.put_i32_le(*v),
                Datum::BigInt(v) => buf.put_i64_le(*v),
                Datum::Decimal(v) => buf.put_f64_le(*v),
                Datum::Varchar(v) => {
                    buf.put_u32_le(v.len() as u32);
                    buf.put_slice(v.as_bytes());
                }
            }
        }
        buf.freeze()
    }

    pub fn decode(schema: &Schema, data: &[u8]) -> Result<Tuple> {
        let mut buf = data;
        let mut values = Vec::with_capacity(schema.num_columns());
        for column in schema.columns() {
            let value = match column.data_type() {
                DataType::Boolean => {
                    ensure_remaining(buf, 1)?;
                    Datum::Boolean(buf.get_u8() != 0)
                }
                DataType::Int => {
                    ensure_remaining(buf, 4)?;
                    Datum::Int(buf.get_i32_le())
                }
                DataType::BigInt => {
                    ensure_remaining(buf, 8)?;
                    Datum::BigInt(buf.get_i64_le())
                }
                DataType::Decimal => {
                    ensure_remaining(buf, 8)?;
                    Datum::Decimal(buf.get_f64_le())
                }
                DataType::Varchar => {
                    ensure_remaining(buf, 4)?;
                    let len = buf.get_u32_le() as usize;
                    ensure_remaining(buf, len)?;
                    let text = std::str::from_utf8(&buf[..len])
                        .map_err(|_| StorageError::Corrupted)?
                        .to_string();
                    buf.advance(len);
                    Datum::Varchar(text)
                }
            };
            values.push(value);
        }
        Ok(Tuple { values })
    }
}

fn ensure_remaining(buf: &[u8], needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(StorageError::Corrupted);
    }
    Ok(())
}
