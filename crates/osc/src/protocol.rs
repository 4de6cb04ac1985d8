use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};

use crate::types::*;
use crate::{OscArg, OscMessage};

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn padding(len: usize) -> usize {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}

/// Write a NUL-terminated string padded to a four byte boundary.
pub fn write_padded_str(buf: &mut Vec<u8>, s: &str) -> io::Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(invalid("string contains a NUL byte"));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    buf.extend(std::iter::repeat(0u8).take(padding(s.len() + 1)));
    Ok(())
}

/// Read a NUL-terminated, four byte aligned string.
pub fn read_padded_str(cursor: &mut Cursor<&[u8]>) -> io::Result<String> {
    let start = cursor.position() as usize;
    let data = *cursor.get_ref();
    let rest = data
        .get(start..)
        .ok_or_else(|| invalid("string starts past end of packet"))?;
    let len = rest
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| invalid("unterminated string"))?;
    let s = std::str::from_utf8(&rest[..len])
        .map_err(|e| invalid(format!("string is not UTF-8: {e}")))?
        .to_string();

    let consumed = len + 1 + padding(len + 1);
    if start + consumed > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "string padding runs past end of packet",
        ));
    }
    cursor.set_position((start + consumed) as u64);
    Ok(s)
}

/// Encode a message.
///
/// Format: padded(address) + padded("," + tags) + args, every argument big-endian.
pub fn encode(message: &OscMessage) -> io::Result<Vec<u8>> {
    if message.address.is_empty() {
        return Err(invalid("empty address"));
    }

    let mut buf = Vec::with_capacity(64);
    write_padded_str(&mut buf, &message.address)?;

    let mut tags = Vec::with_capacity(message.args.len() + 1);
    tags.push(TYPE_TAG_PREFIX);
    tags.extend(message.args.iter().map(|a| a.tag()));
    // Tags are plain ASCII so this cannot fail.
    let tags = String::from_utf8_lossy(&tags).into_owned();
    write_padded_str(&mut buf, &tags)?;

    for arg in &message.args {
        match arg {
            OscArg::Int(v) => buf.write_i32::<BigEndian>(*v)?,
            OscArg::Float(v) => buf.write_f32::<BigEndian>(*v)?,
            OscArg::Double(v) => buf.write_f64::<BigEndian>(*v)?,
            OscArg::String(s) => write_padded_str(&mut buf, s)?,
            OscArg::Bool(_) => {}
        }
    }
    Ok(buf)
}

/// Decode a single message. Bundles and unknown type tags are rejected.
pub fn decode(data: &[u8]) -> io::Result<OscMessage> {
    if data.starts_with(BUNDLE_MARKER) {
        return Err(invalid("bundles are not supported"));
    }
    if data.len() % ALIGNMENT != 0 {
        return Err(invalid(format!(
            "packet length {} is not a multiple of {ALIGNMENT}",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let address = read_padded_str(&mut cursor)?;
    if address.is_empty() {
        return Err(invalid("empty address"));
    }

    // A message without a type-tag string carries no arguments.
    if cursor.position() as usize == data.len() {
        return Ok(OscMessage::new(address, Vec::new()));
    }

    let tags = read_padded_str(&mut cursor)?;
    let tags = tags
        .as_bytes()
        .strip_prefix(&[TYPE_TAG_PREFIX])
        .ok_or_else(|| invalid("type tags must start with ','"))?
        .to_vec();

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags {
        let arg = match tag {
            TAG_INT => OscArg::Int(cursor.read_i32::<BigEndian>()?),
            TAG_FLOAT => OscArg::Float(cursor.read_f32::<BigEndian>()?),
            TAG_DOUBLE => OscArg::Double(cursor.read_f64::<BigEndian>()?),
            TAG_STRING => OscArg::String(read_padded_str(&mut cursor)?),
            TAG_TRUE => OscArg::Bool(true),
            TAG_FALSE => OscArg::Bool(false),
            other => {
                return Err(invalid(format!(
                    "unsupported type tag '{}'",
                    char::from(other)
                )))
            }
        };
        args.push(arg);
    }

    let mut trailing = Vec::new();
    cursor.read_to_end(&mut trailing)?;
    if !trailing.is_empty() {
        return Err(invalid(format!("{} trailing bytes", trailing.len())));
    }

    Ok(OscMessage::new(address, args))
}
