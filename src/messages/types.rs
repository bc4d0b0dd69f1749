//! Decoding of RowDescription and DataRow payloads.

use bytes::{Buf, BytesMut};

use crate::errors::Error;

/// Read a nul-terminated string from a buffer.
pub trait BytesMutReader {
    fn read_string(&mut self) -> Result<String, Error>;
}

impl BytesMutReader for BytesMut {
    fn read_string(&mut self) -> Result<String, Error> {
        match self.iter().position(|&b| b == 0) {
            Some(end) => {
                let value = String::from_utf8_lossy(&self[..end]).to_string();
                self.advance(end + 1);
                Ok(value)
            }
            None => Err(Error::ProtocolSyncError(
                "string is not nul-terminated".to_string(),
            )),
        }
    }
}

/// One field of a row descriptor: the name and the PostgreSQL type OID the
/// raw value bytes are tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: i32,
}

/// Parse a RowDescription payload (code and length already consumed).
pub fn parse_row_description(mut payload: BytesMut) -> Result<Vec<FieldDescription>, Error> {
    if payload.remaining() < 2 {
        return Err(Error::ProtocolSyncError(
            "RowDescription message is too short".to_string(),
        ));
    }
    let fields = payload.get_i16();
    let mut result = Vec::with_capacity(fields as usize);

    for _ in 0..fields {
        let name = payload.read_string()?;
        if payload.remaining() < 18 {
            return Err(Error::ProtocolSyncError(
                "RowDescription field is truncated".to_string(),
            ));
        }
        let _table_oid = payload.get_i32();
        let _column_attnum = payload.get_i16();
        let type_oid = payload.get_i32();
        let _type_size = payload.get_i16();
        let _type_modifier = payload.get_i32();
        let _format = payload.get_i16();

        result.push(FieldDescription { name, type_oid });
    }

    Ok(result)
}

/// Parse a DataRow payload into raw field values; NULL is `None`.
pub fn parse_data_row(mut payload: BytesMut) -> Result<Vec<Option<Vec<u8>>>, Error> {
    if payload.remaining() < 2 {
        return Err(Error::ProtocolSyncError(
            "DataRow message is too short".to_string(),
        ));
    }
    let columns = payload.get_i16();
    let mut result = Vec::with_capacity(columns as usize);

    for _ in 0..columns {
        if payload.remaining() < 4 {
            return Err(Error::ProtocolSyncError(
                "DataRow column is truncated".to_string(),
            ));
        }
        let len = payload.get_i32();
        if len < 0 {
            result.push(None);
            continue;
        }
        let len = len as usize;
        if payload.remaining() < len {
            return Err(Error::ProtocolSyncError(format!(
                "DataRow column length {len} exceeds remaining payload"
            )));
        }
        result.push(Some(payload.split_to(len).to_vec()));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_read_string() {
        let mut buf = BytesMut::from(&b"datname\0rest"[..]);
        assert_eq!(buf.read_string().unwrap(), "datname");
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn test_parse_row_description() {
        let mut payload = BytesMut::new();
        payload.put_i16(2);
        for (name, oid) in [("datname", 19), ("size", 20)] {
            payload.put_slice(name.as_bytes());
            payload.put_u8(0);
            payload.put_i32(0); // table oid
            payload.put_i16(0); // attnum
            payload.put_i32(oid);
            payload.put_i16(-1); // type size
            payload.put_i32(-1); // type modifier
            payload.put_i16(0); // format
        }

        let fields = parse_row_description(payload).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "datname");
        assert_eq!(fields[1].type_oid, 20);
    }

    #[test]
    fn test_parse_data_row_with_null() {
        let mut payload = BytesMut::new();
        payload.put_i16(3);
        payload.put_i32(8);
        payload.put_slice(b"postgres");
        payload.put_i32(-1); // NULL
        payload.put_i32(2);
        payload.put_slice(b"42");

        let row = parse_data_row(payload).unwrap();
        assert_eq!(row[0].as_deref(), Some(&b"postgres"[..]));
        assert_eq!(row[1], None);
        assert_eq!(row[2].as_deref(), Some(&b"42"[..]));
    }

    #[test]
    fn test_parse_data_row_truncated() {
        let mut payload = BytesMut::new();
        payload.put_i16(1);
        payload.put_i32(10);
        payload.put_slice(b"short");
        assert!(parse_data_row(payload).is_err());
    }
}
