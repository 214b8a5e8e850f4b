use byteorder::{ByteOrder, LittleEndian};

use crate::common::rid::Rid;

/// Fixed-width little endian encoding for keys and values stored in index
/// pages. Page codecs rely on `ENCODED_LEN` to lay entries out back to back.
pub trait FixedCodec: Sized {
    const ENCODED_LEN: usize;

    fn encode_into(&self, buf: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Self;
}

impl FixedCodec for u32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl FixedCodec for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

impl FixedCodec for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl FixedCodec for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl FixedCodec for Rid {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, self.page_id);
        LittleEndian::write_u32(&mut buf[4..], self.slot);
    }

    fn decode_from(buf: &[u8]) -> Self {
        Rid {
            page_id: LittleEndian::read_u32(buf),
            slot: LittleEndian::read_u32(&buf[4..]),
        }
    }
}
