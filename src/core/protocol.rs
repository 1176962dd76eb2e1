/// Frontend/backend v3 wire framing
///
/// Builds the startup message, the termination message, and the simple
/// query request. All length fields are network byte order and include
/// themselves.
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, StartupField};

/// V3 protocol version word: major 3, minor 0.
pub const PROTOCOL_VERSION: u32 = 0x0003_0000;

/// Fixed capacity of the startup parameter block.
pub const STARTUP_PARAM_CAPACITY: usize = 1024;

/// Startup message plus its parsed shorthand.
///
/// `raw` holds the protocol version word followed by the parameter block;
/// `length` is the on-wire length including the 4-byte length field that
/// prefixes `raw`.
#[derive(Debug, Clone)]
pub struct StartupPacket {
    raw: Bytes,
    length: u32,
    protocol_major: u16,
    protocol_minor: u16,
    database: String,
    user: String,
    application_name: Option<String>,
}

impl StartupPacket {
    /// Protocol version word and parameter block, without the length field.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// On-wire message length, including the length field itself.
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn protocol_major(&self) -> u16 {
        self.protocol_major
    }

    pub fn protocol_minor(&self) -> u16 {
        self.protocol_minor
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    /// Decode a startup message body (version word plus parameter block).
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < 5 {
            return Err(FrameError::Malformed("message too short"));
        }

        let version = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let protocol_major = (version >> 16) as u16;
        let protocol_minor = (version & 0xffff) as u16;
        if protocol_major != 3 {
            return Err(FrameError::Malformed("unsupported protocol version"));
        }

        let mut user = None;
        let mut database = None;
        let mut application_name = None;

        let mut rest = &raw[4..];
        loop {
            let key = take_cstr(&mut rest)?;
            if key.is_empty() {
                break;
            }
            let value = take_cstr(&mut rest)?;
            match key {
                "user" => user = Some(value.to_string()),
                "database" => database = Some(value.to_string()),
                "application_name" => application_name = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            raw: Bytes::copy_from_slice(raw),
            length: (raw.len() + 4) as u32,
            protocol_major,
            protocol_minor,
            database: database.ok_or(FrameError::Malformed("missing database parameter"))?,
            user: user.ok_or(FrameError::Malformed("missing user parameter"))?,
            application_name,
        })
    }
}

fn take_cstr<'a>(rest: &mut &'a [u8]) -> Result<&'a str, FrameError> {
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(FrameError::Malformed("unterminated parameter string"))?;
    let (head, tail) = rest.split_at(nul);
    *rest = &tail[1..];
    std::str::from_utf8(head).map_err(|_| FrameError::Malformed("parameter is not valid UTF-8"))
}

/// Build the startup message for `user` / `database`.
///
/// The parameter block capacity is fixed; an oversized field fails with
/// the field that was being appended when capacity ran out.
pub fn build_startup_packet(user: &str, database: &str) -> Result<StartupPacket, FrameError> {
    let mut params = BytesMut::with_capacity(STARTUP_PARAM_CAPACITY);

    append_param(&mut params, b"user", StartupField::User)?;
    append_param(&mut params, user.as_bytes(), StartupField::User)?;
    // An overflow on the key below is attributed to the database field
    // even though it is the user value that consumed the space.
    append_param(&mut params, b"database", StartupField::Database)?;
    append_param(&mut params, database.as_bytes(), StartupField::Database)?;
    // The append checks keep one byte free, so the terminator always fits
    params.put_u8(0);

    let mut raw = BytesMut::with_capacity(4 + params.len());
    raw.put_u32(PROTOCOL_VERSION);
    raw.extend_from_slice(&params);
    let raw = raw.freeze();

    Ok(StartupPacket {
        length: (raw.len() + 4) as u32,
        raw,
        protocol_major: 3,
        protocol_minor: 0,
        database: database.to_string(),
        user: user.to_string(),
        application_name: None,
    })
}

fn append_param(buf: &mut BytesMut, bytes: &[u8], field: StartupField) -> Result<(), FrameError> {
    let needed = bytes.len() + 1;
    if needed >= STARTUP_PARAM_CAPACITY - buf.len() {
        return Err(FrameError::Overflow(field));
    }
    buf.extend_from_slice(bytes);
    buf.put_u8(0);
    Ok(())
}

/// The termination message: tag byte plus a length field covering itself.
pub fn terminate_frame() -> [u8; 5] {
    [b'X', 0, 0, 0, 4]
}

/// Frame a simple query request carrying `sql`.
pub fn simple_query_frame(sql: &str) -> Bytes {
    let len = 4 + sql.len() + 1;
    let mut buf = BytesMut::with_capacity(1 + len);
    buf.put_u8(b'Q');
    buf.put_u32(len as u32);
    buf.extend_from_slice(sql.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}
