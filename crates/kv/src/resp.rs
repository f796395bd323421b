//! RESP2 wire encoding: commands are arrays of bulk strings, and replies are
//! one of the five RESP2 types.
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Largest bulk string accepted in a reply, matching Redis's `proto-max-bulk-len`.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the nil bulk string.
    Bulk(Option<Vec<u8>>),
    /// `None` is the nil array.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn bulk(s: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(Some(s.into()))
    }
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

pub fn encode_reply(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Simple(s) => out.extend_from_slice(format!("+{s}\r\n").as_bytes()),
        Reply::Error(s) => out.extend_from_slice(format!("-{s}\r\n").as_bytes()),
        Reply::Integer(i) => out.extend_from_slice(format!(":{i}\r\n").as_bytes()),
        Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
        Reply::Bulk(Some(b)) => {
            out.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
        }
        Reply::Array(None) => out.extend_from_slice(b"*-1\r\n"),
        Reply::Array(Some(items)) => {
            out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_reply(item, out);
            }
        }
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

async fn read_line<R: AsyncBufRead + Unpin>(r: &mut R) -> io::Result<String> {
    let mut buf = Vec::new();
    if r.read_until(b'\n', &mut buf).await? == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid("reply line is not CRLF-terminated"));
    }
    buf.truncate(buf.len() - 2);
    String::from_utf8(buf).map_err(|_| invalid("reply line is not UTF-8"))
}

fn parse_len(s: &str) -> io::Result<i64> {
    s.parse::<i64>()
        .map_err(|_| invalid(format!("invalid length or integer {s:?}")))
}

/// Read one reply. Malformed input is an `InvalidData` error.
pub fn read_reply<'r, R>(r: &'r mut R) -> BoxFuture<'r, io::Result<Reply>>
where
    R: AsyncBufRead + Unpin + Send,
{
    async move {
        let line = read_line(r).await?;
        let mut chars = line.chars();
        let tag = chars.next();
        let rest = chars.as_str();

        match tag {
            Some('+') => Ok(Reply::Simple(rest.to_string())),
            Some('-') => Ok(Reply::Error(rest.to_string())),
            Some(':') => Ok(Reply::Integer(parse_len(rest)?)),
            Some('$') => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                if len > MAX_BULK_LEN {
                    return Err(invalid(format!(
                        "bulk string length {len} exceeds {MAX_BULK_LEN}"
                    )));
                }
                let mut body = vec![0; len as usize + 2];
                r.read_exact(&mut body).await?;
                if !body.ends_with(b"\r\n") {
                    return Err(invalid("bulk string is not CRLF-terminated"));
                }
                body.truncate(len as usize);
                Ok(Reply::Bulk(Some(body)))
            }
            Some('*') => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                let mut items = Vec::with_capacity(len.min(1024) as usize);
                for _ in 0..len {
                    items.push(read_reply(&mut *r).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            _ => Err(invalid(format!("unexpected reply type {tag:?}"))),
        }
    }
    .boxed()
}
