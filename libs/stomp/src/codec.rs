use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StompError;
use crate::frame::{Command, Frame, Headers, header};

/// 16 MiB: верхняя граница фрейма по умолчанию.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Единица передачи: heartbeat (пустая строка) или полный фрейм.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmission {
    HeartBeat,
    Frame(Frame),
}

/// Codec STOMP фреймов поверх байтового потока.
///
/// Stateless между фреймами: неполный фрейм остаётся в буфере
/// и разбирается заново при следующем вызове.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Transmission;
    type Error = StompError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Transmission>, StompError> {
        match src.first() {
            None => return Ok(None),
            Some(b'\n') => {
                src.advance(1);
                return Ok(Some(Transmission::HeartBeat));
            }
            Some(b'\r') => {
                if src.len() < 2 {
                    return Ok(None);
                }
                if src[1] != b'\n' {
                    return Err(StompError::Malformed("stray carriage return".into()));
                }
                src.advance(2);
                return Ok(Some(Transmission::HeartBeat));
            }
            Some(_) => {}
        }

        let Some((head_len, body_start)) = find_head_end(src) else {
            self.check_size(src.len())?;
            return Ok(None);
        };

        let head = std::str::from_utf8(&src[..head_len])
            .map_err(|e| StompError::Malformed(format!("frame head is not UTF-8: {e}")))?;
        let (command, headers) = parse_head(head)?;

        let (body_end, total) = match headers.get(header::CONTENT_LENGTH) {
            Some(len) => {
                let len: usize = len.trim().parse().map_err(|_| {
                    StompError::Malformed(format!("invalid content-length {len:?}"))
                })?;
                self.check_size(len)?;
                let body_end = body_start
                    .checked_add(len)
                    .ok_or(StompError::FrameTooLarge { limit: self.max_frame_size })?;
                self.check_size(body_end.saturating_add(1))?;
                if src.len() <= body_end {
                    src.reserve(body_end + 1 - src.len());
                    return Ok(None);
                }
                if src[body_end] != 0 {
                    return Err(StompError::Malformed(
                        "body is not NUL-terminated after content-length bytes".into(),
                    ));
                }
                (body_end, body_end + 1)
            }
            None => match src[body_start..].iter().position(|b| *b == 0) {
                Some(n) => (body_start + n, body_start + n + 1),
                None => {
                    self.check_size(src.len())?;
                    return Ok(None);
                }
            },
        };

        let mut raw = src.split_to(total);
        raw.advance(body_start);
        raw.truncate(body_end - body_start);
        let body: Bytes = raw.freeze();

        Ok(Some(Transmission::Frame(Frame { command, headers, body })))
    }
}

impl FrameCodec {
    fn check_size(&self, len: usize) -> Result<(), StompError> {
        if len > self.max_frame_size {
            return Err(StompError::FrameTooLarge { limit: self.max_frame_size });
        }
        Ok(())
    }
}

impl Encoder<Transmission> for FrameCodec {
    type Error = StompError;

    fn encode(&mut self, item: Transmission, dst: &mut BytesMut) -> Result<(), StompError> {
        let frame = match item {
            Transmission::HeartBeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            Transmission::Frame(frame) => frame,
        };

        let escape = frame.command.escapes_headers();
        dst.put_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (key, value) in frame.headers.iter() {
            put_header_part(dst, key, escape);
            dst.put_u8(b':');
            put_header_part(dst, value, escape);
            dst.put_u8(b'\n');
        }
        if !frame.body.is_empty() && !frame.headers.contains(header::CONTENT_LENGTH) {
            dst.put_slice(format!("{}:{}\n", header::CONTENT_LENGTH, frame.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

/// Позиция конца заголовков: (длина head без завершающего EOL, начало body).
fn find_head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(n) = buf[from..].iter().position(|b| *b == b'\n') {
        let i = from + n;
        match buf.get(i + 1) {
            Some(b'\n') => return Some((line_end(buf, i), i + 2)),
            Some(b'\r') => match buf.get(i + 2) {
                Some(b'\n') => return Some((line_end(buf, i), i + 3)),
                Some(_) => {}
                None => return None,
            },
            Some(_) => {}
            None => return None,
        }
        from = i + 1;
    }
    None
}

/// Конец строки без `\r` перед `\n`.
fn line_end(buf: &[u8], newline: usize) -> usize {
    if newline > 0 && buf[newline - 1] == b'\r' {
        newline - 1
    } else {
        newline
    }
}

fn parse_head(head: &str) -> Result<(Command, Headers), StompError> {
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
    let first = lines.next().unwrap_or_default();
    let command = Command::parse(first)
        .ok_or_else(|| StompError::Malformed(format!("unknown command {first:?}")))?;
    let escaped = command.escapes_headers();

    let mut headers = Headers::new();
    for line in lines {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::Malformed(format!("header without ':' {line:?}")))?;
        if escaped {
            headers.add(unescape(key)?, unescape(value)?);
        } else {
            headers.add(key, value);
        }
    }
    Ok((command, headers))
}

fn unescape(s: &str) -> Result<String, StompError> {
    if !s.contains('\\') {
        return Ok(s.to_string());
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            other => {
                return Err(StompError::Malformed(format!(
                    "invalid escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

fn put_header_part(dst: &mut BytesMut, s: &str, escape: bool) {
    if !escape {
        dst.put_slice(s.as_bytes());
        return;
    }
    for c in s.chars() {
        match c {
            '\\' => dst.put_slice(b"\\\\"),
            '\n' => dst.put_slice(b"\\n"),
            '\r' => dst.put_slice(b"\\r"),
            ':' => dst.put_slice(b"\\c"),
            c => {
                let mut tmp = [0u8; 4];
                dst.put_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
}
