//! ErrorResponse / NoticeResponse field parsing.

use crate::errors::Error;

/// Fields of a server ErrorResponse or NoticeResponse.
///
/// The payload is a sequence of (field-type byte, nul-terminated string)
/// pairs terminated by a zero byte. Only the fields the exporter reports
/// are retained; the SQLSTATE and message are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PgErrorMsg {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
}

impl PgErrorMsg {
    pub fn parse(payload: &[u8]) -> Result<PgErrorMsg, Error> {
        let mut msg = PgErrorMsg::default();
        let mut it = payload.iter().enumerate();

        while let Some((start, &field_type)) = it.next() {
            if field_type == 0 {
                break;
            }
            let rest = &payload[start + 1..];
            let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
                Error::ProtocolSyncError(
                    "error message field is not nul-terminated".to_string(),
                )
            })?;
            let value = String::from_utf8_lossy(&rest[..end]).to_string();

            match field_type {
                b'S' => msg.severity = value,
                b'C' => msg.code = value,
                b'M' => msg.message = value,
                b'D' => msg.detail = Some(value),
                _ => (),
            }

            // Skip past the value and its terminator.
            for _ in 0..=end {
                it.next();
            }
        }

        if msg.message.is_empty() && msg.code.is_empty() {
            return Err(Error::ProtocolSyncError(
                "error message carries no fields".to_string(),
            ));
        }

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(fields: &[(u8, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (t, v) in fields {
            out.push(*t);
            out.extend_from_slice(v.as_bytes());
            out.push(0);
        }
        out.push(0);
        out
    }

    #[test]
    fn test_parse_error_fields() {
        let payload = encode(&[
            (b'S', "ERROR"),
            (b'V', "ERROR"),
            (b'C', "42P01"),
            (b'M', "relation \"missing\" does not exist"),
        ]);
        let msg = PgErrorMsg::parse(&payload).unwrap();
        assert_eq!(msg.severity, "ERROR");
        assert_eq!(msg.code, "42P01");
        assert_eq!(msg.message, "relation \"missing\" does not exist");
        assert_eq!(msg.detail, None);
    }

    #[test]
    fn test_parse_unknown_fields_skipped() {
        let payload = encode(&[(b'S', "FATAL"), (b'C', "28P01"), (b'M', "no"), (b'F', "auth.c")]);
        let msg = PgErrorMsg::parse(&payload).unwrap();
        assert_eq!(msg.code, "28P01");
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(PgErrorMsg::parse(&[0]).is_err());
    }
}
