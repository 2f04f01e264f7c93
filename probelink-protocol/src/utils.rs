use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::errors::DeserializeError;

pub fn ensure(buf: &Bytes, len: usize, what: &'static str) -> Result<(), DeserializeError> {
    if buf.remaining() < len {
        return Err(DeserializeError::UnexpectedEOF(what));
    }
    Ok(())
}

pub fn put_str(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.extend_from_slice(value.as_bytes());
}

pub fn get_str(buf: &mut Bytes, what: &'static str) -> Result<String, DeserializeError> {
    ensure(buf, 4, what)?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, what)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DeserializeError::InvalidUtf8(what))
}

// empty string on the wire means "absent"
pub fn put_opt_str(buf: &mut BytesMut, value: Option<&str>) {
    put_str(buf, value.unwrap_or_default());
}

pub fn get_opt_str(buf: &mut Bytes, what: &'static str) -> Result<Option<String>, DeserializeError> {
    let value = get_str(buf, what)?;
    Ok(if value.is_empty() { None } else { Some(value) })
}

pub fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.extend_from_slice(value);
}

pub fn get_bytes(buf: &mut Bytes, what: &'static str) -> Result<Bytes, DeserializeError> {
    ensure(buf, 4, what)?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, what)?;
    Ok(buf.split_to(len))
}

pub fn get_u8(buf: &mut Bytes, what: &'static str) -> Result<u8, DeserializeError> {
    ensure(buf, 1, what)?;
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut Bytes, what: &'static str) -> Result<u16, DeserializeError> {
    ensure(buf, 2, what)?;
    Ok(buf.get_u16())
}

pub fn get_u32(buf: &mut Bytes, what: &'static str) -> Result<u32, DeserializeError> {
    ensure(buf, 4, what)?;
    Ok(buf.get_u32())
}

pub fn get_u64(buf: &mut Bytes, what: &'static str) -> Result<u64, DeserializeError> {
    ensure(buf, 8, what)?;
    Ok(buf.get_u64())
}

pub fn get_bool(buf: &mut Bytes, what: &'static str) -> Result<bool, DeserializeError> {
    Ok(get_u8(buf, what)? != 0)
}
