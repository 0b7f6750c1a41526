use bytes::{Buf, BufMut, BytesMut};

/// Largest bulk string we accept on the wire (512MB, same as Redis).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest multi-bulk element count we accept.
const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;
/// Inline commands longer than this without a CRLF are rejected.
const MAX_INLINE_LEN: usize = 64 * 1024;

/// A RESP2 value. Both requests and replies are expressed in this type.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// `+OK\r\n`
    SimpleString(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`, or `$-1\r\n` for the null bulk
    BulkString(Option<Vec<u8>>),
    /// `*2\r\n...`, or `*-1\r\n` for the null array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn status(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    pub fn empty_array() -> Self {
        RespValue::Array(Some(Vec::new()))
    }

    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    /// Wrap a command line as the multi-bulk array it travels as on the wire.
    pub fn from_cmdline(line: &[Vec<u8>]) -> Self {
        RespValue::Array(Some(
            line.iter()
                .map(|arg| RespValue::BulkString(Some(arg.clone())))
                .collect(),
        ))
    }

    /// The raw bytes of a bulk or simple string, if this value carries one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(Some(data)) => Some(data),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Lossy UTF-8 view of a bulk or simple string.
    pub fn to_string_lossy(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Flatten a multi-bulk request into a command line. Returns `None`
    /// if any element is not a string-bearing value.
    pub fn into_cmdline(self) -> Option<Vec<Vec<u8>>> {
        match self {
            RespValue::Array(Some(items)) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(Some(data)) => Some(data),
                    RespValue::SimpleString(s) => Some(s.into_bytes()),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Serialize this value to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Append the wire encoding of this value to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => buf.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                buf.put_u8(b'$');
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                buf.put_u8(b'*');
                buf.put_slice(items.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("Protocol error: {0}")]
    Protocol(String),
}

fn protocol_err<T>(msg: impl Into<String>) -> Result<T, RespError> {
    Err(RespError::Protocol(msg.into()))
}

/// Streaming RESP parser.
///
/// Feed bytes into a `BytesMut` as they arrive and call [`RespParser::parse`]
/// repeatedly. A complete frame is consumed from the buffer and returned;
/// `Ok(None)` means the buffer does not yet hold a whole frame and nothing
/// was consumed. After an `Err` the caller must discard buffered input;
/// the next byte it feeds is presumed to begin a fresh message.
pub struct RespParser;

impl RespParser {
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        match buf[0] {
            b'+' | b'-' | b':' | b'$' | b'*' => Self::parse_value(buf),
            _ => Self::parse_inline(buf),
        }
    }

    fn parse_value(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        if buf.is_empty() {
            return Ok(None);
        }
        match buf[0] {
            b'+' => Ok(take_line(buf, 1).map(RespValue::SimpleString)),
            b'-' => Ok(take_line(buf, 1).map(RespValue::Error)),
            b':' => {
                let line = match take_line(buf, 1) {
                    Some(line) => line,
                    None => return Ok(None),
                };
                match line.parse::<i64>() {
                    Ok(n) => Ok(Some(RespValue::Integer(n))),
                    Err(_) => protocol_err(format!("invalid integer '{line}'")),
                }
            }
            b'$' => Self::parse_bulk(buf),
            b'*' => Self::parse_array(buf),
            other => protocol_err(format!("unexpected byte '{}'", other as char)),
        }
    }

    fn parse_bulk(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let header_end = match find_crlf(buf, 1) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let len = parse_len(&buf[1..header_end])?;

        if len == -1 {
            buf.advance(header_end + 2);
            return Ok(Some(RespValue::BulkString(None)));
        }
        if len < -1 || len > MAX_BULK_LEN {
            return protocol_err("invalid bulk length");
        }

        let len = len as usize;
        let frame_end = header_end + 2 + len + 2;
        if buf.len() < frame_end {
            return Ok(None);
        }
        if &buf[frame_end - 2..frame_end] != b"\r\n" {
            return protocol_err("bulk string missing trailing CRLF");
        }

        let payload = buf[header_end + 2..header_end + 2 + len].to_vec();
        buf.advance(frame_end);
        Ok(Some(RespValue::BulkString(Some(payload))))
    }

    fn parse_array(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let header_end = match find_crlf(buf, 1) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let count = parse_len(&buf[1..header_end])?;

        if count == -1 {
            buf.advance(header_end + 2);
            return Ok(Some(RespValue::Array(None)));
        }
        if count < -1 || count > MAX_MULTIBULK_LEN {
            return protocol_err("invalid multibulk length");
        }

        // Elements may still be in flight; keep a copy so an incomplete
        // tail rewinds to the header instead of half-consuming the frame.
        let saved = buf.clone();
        buf.advance(header_end + 2);

        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match Self::parse_value(buf) {
                // A `$-1` nested in a multi-bulk carries an empty
                // argument, not a null; only the top level has nulls.
                Ok(Some(RespValue::BulkString(None))) => {
                    items.push(RespValue::BulkString(Some(Vec::new())));
                }
                Ok(Some(item)) => items.push(item),
                Ok(None) => {
                    *buf = saved;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(RespValue::Array(Some(items))))
    }

    /// Telnet-style fallback: a bare line is split on whitespace and
    /// surfaced as a multi-bulk command. An empty line yields an empty
    /// array so the caller can skip it and keep reading.
    fn parse_inline(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let end = match find_crlf(buf, 0) {
            Some(pos) => pos,
            None => {
                if buf.len() > MAX_INLINE_LEN {
                    return protocol_err("too big inline request");
                }
                return Ok(None);
            }
        };

        let items: Vec<RespValue> = buf[..end]
            .split(|b| b.is_ascii_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| RespValue::BulkString(Some(token.to_vec())))
            .collect();
        buf.advance(end + 2);
        Ok(Some(RespValue::Array(Some(items))))
    }
}

/// Consume one CRLF-terminated line starting at `skip` (past the type tag)
/// and return it lossily decoded. `None` if the line is not complete yet;
/// nothing is consumed in that case.
fn take_line(buf: &mut BytesMut, skip: usize) -> Option<String> {
    let end = find_crlf(buf, skip)?;
    let line = String::from_utf8_lossy(&buf[skip..end]).into_owned();
    buf.advance(end + 2);
    Some(line)
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    if buf.len() < start + 2 {
        return None;
    }
    (start..buf.len() - 1).find(|&i| buf[i] == b'\r' && buf[i + 1] == b'\n')
}

fn parse_len(raw: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| RespError::Protocol("invalid length header".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &[u8]) -> RespValue {
        let mut buf = BytesMut::from(input);
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "frame not fully consumed");
        value
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(parse_one(b"+OK\r\n"), RespValue::SimpleString("OK".into()));
    }

    #[test]
    fn parses_error() {
        assert_eq!(
            parse_one(b"-ERR unknown command\r\n"),
            RespValue::Error("ERR unknown command".into())
        );
    }

    #[test]
    fn parses_integers() {
        assert_eq!(parse_one(b":1000\r\n"), RespValue::Integer(1000));
        assert_eq!(parse_one(b":-42\r\n"), RespValue::Integer(-42));
    }

    #[test]
    fn rejects_bad_integer() {
        let mut buf = BytesMut::from(&b":abc\r\n"[..]);
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn parses_bulk_string() {
        assert_eq!(
            parse_one(b"$6\r\nfoobar\r\n"),
            RespValue::bulk(&b"foobar"[..])
        );
    }

    #[test]
    fn parses_null_and_empty_bulk() {
        assert_eq!(parse_one(b"$-1\r\n"), RespValue::null_bulk());
        assert_eq!(parse_one(b"$0\r\n\r\n"), RespValue::bulk(Vec::new()));
    }

    #[test]
    fn rejects_negative_non_null_bulk_len() {
        let mut buf = BytesMut::from(&b"$-7\r\n"[..]);
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn rejects_bulk_without_trailing_crlf() {
        let mut buf = BytesMut::from(&b"$3\r\nGETXY"[..]);
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn parses_command_array() {
        assert_eq!(
            parse_one(b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"),
            RespValue::array(vec![
                RespValue::bulk(&b"foo"[..]),
                RespValue::bulk(&b"bar"[..]),
            ])
        );
    }

    #[test]
    fn parses_null_and_empty_array() {
        assert_eq!(parse_one(b"*-1\r\n"), RespValue::null_array());
        assert_eq!(parse_one(b"*0\r\n"), RespValue::empty_array());
    }

    #[test]
    fn null_bulk_inside_multibulk_is_an_empty_argument() {
        let value = parse_one(b"*2\r\n$3\r\nfoo\r\n$-1\r\n");
        assert_eq!(
            value,
            RespValue::array(vec![
                RespValue::bulk(&b"foo"[..]),
                RespValue::bulk(Vec::new()),
            ])
        );
        // The frame still flattens into a dispatchable command line.
        assert_eq!(
            value.into_cmdline().unwrap(),
            vec![b"foo".to_vec(), Vec::new()]
        );
    }

    #[test]
    fn rejects_negative_non_null_array_count() {
        let mut buf = BytesMut::from(&b"*-3\r\n"[..]);
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn partial_input_consumes_nothing() {
        let mut buf = BytesMut::from(&b"$6\r\nfoo"[..]);
        assert!(RespParser::parse(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"$6\r\nfoo");

        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n"[..]);
        assert!(RespParser::parse(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n");
    }

    #[test]
    fn drains_multiple_frames() {
        let mut buf = BytesMut::from(&b"+OK\r\n:7\r\n"[..]);
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            RespValue::SimpleString("OK".into())
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            RespValue::Integer(7)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn parses_inline_command() {
        assert_eq!(
            parse_one(b"SET key value\r\n"),
            RespValue::array(vec![
                RespValue::bulk(&b"SET"[..]),
                RespValue::bulk(&b"key"[..]),
                RespValue::bulk(&b"value"[..]),
            ])
        );
    }

    #[test]
    fn inline_blank_line_is_an_empty_command() {
        assert_eq!(parse_one(b"\r\n"), RespValue::empty_array());
    }

    #[test]
    fn garbage_inside_array_is_a_protocol_error() {
        // A client desyncing mid multi-bulk. The parser reports the error;
        // the session layer clears its buffer and carries on.
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\nX"[..]);
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn serializes_every_reply_kind() {
        assert_eq!(RespValue::ok().to_bytes(), b"+OK\r\n");
        assert_eq!(RespValue::error("ERR bad").to_bytes(), b"-ERR bad\r\n");
        assert_eq!(RespValue::integer(42).to_bytes(), b":42\r\n");
        assert_eq!(RespValue::bulk(&b"hello"[..]).to_bytes(), b"$5\r\nhello\r\n");
        assert_eq!(RespValue::null_bulk().to_bytes(), b"$-1\r\n");
        assert_eq!(RespValue::null_array().to_bytes(), b"*-1\r\n");
        assert_eq!(RespValue::empty_array().to_bytes(), b"*0\r\n");
        assert_eq!(
            RespValue::array(vec![RespValue::bulk(&b"foo"[..]), RespValue::integer(42)])
                .to_bytes(),
            b"*2\r\n$3\r\nfoo\r\n:42\r\n"
        );
    }

    #[test]
    fn round_trips_replies() {
        let values = vec![
            RespValue::ok(),
            RespValue::status("string"),
            RespValue::error("ERR no such key"),
            RespValue::integer(-2),
            RespValue::bulk(&b"binary \x00 safe"[..]),
            RespValue::null_bulk(),
            RespValue::null_array(),
            RespValue::empty_array(),
            RespValue::array(vec![
                RespValue::bulk(&b"DEL"[..]),
                RespValue::bulk(&b"k"[..]),
                RespValue::integer(3),
                RespValue::array(vec![RespValue::bulk(Vec::new())]),
            ]),
        ];
        for value in values {
            let mut buf = BytesMut::from(&value.to_bytes()[..]);
            let reparsed = RespParser::parse(&mut buf).unwrap().unwrap();
            assert_eq!(reparsed, value);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn cmdline_round_trip() {
        let line: Vec<Vec<u8>> = vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()];
        let value = RespValue::from_cmdline(&line);
        assert_eq!(value.clone().into_cmdline().unwrap(), line);
        assert_eq!(value.to_bytes(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }
}
