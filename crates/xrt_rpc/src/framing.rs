use serde::Serialize;
use std::io::{self, BufRead, Write};

/// Write `message` as one line of JSON and flush.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> io::Result<()> {
    let json = serde_json::to_string(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)?;
    writer.flush()
}

/// Read the next non-empty line as a JSON value. `Ok(None)` means the peer
/// closed the stream.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<serde_json::Value>> {
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        return serde_json::from_str(line)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, RequestId};
    use std::io::Cursor;

    #[test]
    fn test_messages_are_line_delimited() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Request::new("initialize", None, RequestId::Number(1))).unwrap();
        write_message(&mut buf, &Request::new("shutdown", None, RequestId::Number(2))).unwrap();
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 2);

        let mut reader = Cursor::new(buf);
        let first = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(first["method"], "initialize");
        let second = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(second["id"], 2);
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_blank_lines_are_skipped_and_garbage_rejected() {
        let mut reader = Cursor::new(b"\n\n{\"a\":1}\nnot json\n".to_vec());
        assert_eq!(read_message(&mut reader).unwrap().unwrap()["a"], 1);
        assert!(read_message(&mut reader).is_err());
    }
}
