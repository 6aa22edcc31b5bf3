//! Chunked transfer codec (RFC 7230 §4.1)
//!
//! The decoder works in place over the connection buffer: framing bytes are
//! removed as they are recognized and `buffered` counts the decoded data
//! bytes sitting at the front of the buffer, ready for the consumer. The
//! encoder is the inverse transform for standalone byte sequences; the
//! response wire path writes its chunk framing through the serializer.

use netbuf::Buf;

use crate::error::{DecodeError, DecodeKind, Error};
use crate::head_parser::HeadParser;
use crate::headers::Headers;

#[derive(Debug)]
enum State {
    /// Reading the hex digits of a size line; empty lines are skipped
    Size { value: u64, digits: u8 },
    /// Discarding chunk extensions after `;`
    Ext { value: u64 },
    /// Passing through chunk data
    Data,
    /// Expecting the CRLF after chunk data
    DataEnd,
    /// Reading the optional trailer section after the 0-size chunk
    Trailers,
    Done,
}

/// Streaming decoder for a chunked message body.
///
/// Single-use: once the terminating sequence has been seen the decoder
/// reports done, empty, and zero pending bytes forever.
#[derive(Debug)]
pub struct Decoder {
    buffered: usize,
    pending: u64,
    state: State,
    trailer_parser: Option<HeadParser>,
    trailers: Option<Headers>,
    max_trailers: usize,
}

fn hex_value(b: u8) -> Option<u64> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as u64),
        b'a'..=b'f' => Some((b - b'a' + 10) as u64),
        b'A'..=b'F' => Some((b - b'A' + 10) as u64),
        _ => None,
    }
}

fn decode_err(kind: DecodeKind, byte: Option<u8>) -> Error {
    DecodeError { kind, byte }.into()
}

impl Decoder {
    pub fn new(max_trailers: usize) -> Decoder {
        Decoder {
            buffered: 0,
            pending: 0,
            state: State::Size { value: 0, digits: 0 },
            trailer_parser: None,
            trailers: None,
            max_trailers,
        }
    }

    /// Advance over whatever is in `buf`. Framing bytes are removed from the
    /// buffer; decoded data bytes stay at the front and are accounted for by
    /// `buffered()`.
    pub fn parse(&mut self, buf: &mut Buf) -> Result<(), Error> {
        while self.buffered < buf.len() {
            match self.state {
                State::Size { value, digits } => {
                    let b = buf[self.buffered..][0];
                    buf.remove_range(self.buffered..self.buffered + 1);
                    match b {
                        b'\r' => {}
                        b'\n' => {
                            if digits > 0 {
                                self.finish_size(value)?;
                            }
                            // an empty line before the digits is skipped
                        }
                        b';' => {
                            if digits == 0 {
                                return Err(decode_err(
                                    DecodeKind::IllegalSizeByte, Some(b)));
                            }
                            self.state = State::Ext { value };
                        }
                        b => match hex_value(b) {
                            Some(d) => {
                                if digits >= 16 {
                                    return Err(decode_err(
                                        DecodeKind::LongOverflow, Some(b)));
                                }
                                self.state = State::Size {
                                    value: value * 16 + d,
                                    digits: digits + 1,
                                };
                            }
                            None => {
                                return Err(decode_err(
                                    DecodeKind::IllegalSizeByte, Some(b)));
                            }
                        },
                    }
                }
                State::Ext { value } => {
                    let b = buf[self.buffered..][0];
                    buf.remove_range(self.buffered..self.buffered + 1);
                    match b {
                        b'"' => {
                            return Err(decode_err(
                                DecodeKind::QuotedExtension, Some(b)));
                        }
                        b'\r' => {}
                        b'\n' => self.finish_size(value)?,
                        _ => {}
                    }
                }
                State::Data => {
                    let avail = (buf.len() - self.buffered) as u64;
                    let take = ::std::cmp::min(self.pending, avail) as usize;
                    self.buffered += take;
                    self.pending -= take as u64;
                    if self.pending == 0 {
                        self.state = State::DataEnd;
                    }
                }
                State::DataEnd => {
                    let b = buf[self.buffered..][0];
                    match b {
                        b'\r' => {
                            buf.remove_range(self.buffered..self.buffered + 1);
                        }
                        b'\n' => {
                            buf.remove_range(self.buffered..self.buffered + 1);
                            self.state = State::Size { value: 0, digits: 0 };
                        }
                        b => {
                            return Err(decode_err(
                                DecodeKind::MissingDataTerminator, Some(b)));
                        }
                    }
                }
                State::Trailers => {
                    let (consumed, done) = {
                        let parser = self.trailer_parser.as_mut()
                            .expect("trailer parser exists in Trailers state");
                        parser.feed(&buf[self.buffered..])?
                    };
                    buf.remove_range(self.buffered..self.buffered + consumed);
                    if done {
                        let parser = self.trailer_parser.take()
                            .expect("trailer parser exists in Trailers state");
                        self.trailers = Some(parser.into_headers());
                        self.state = State::Done;
                    }
                }
                State::Done => break,
            }
        }
        Ok(())
    }

    fn finish_size(&mut self, value: u64) -> Result<(), Error> {
        if value > i64::max_value() as u64 {
            return Err(decode_err(DecodeKind::LongOverflow, None));
        }
        if value == 0 {
            self.trailer_parser = Some(HeadParser::trailers(self.max_trailers));
            self.state = State::Trailers;
        } else {
            self.pending = value;
            self.state = State::Data;
        }
        Ok(())
    }

    /// Decoded data bytes sitting at the front of the buffer.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// The consumer took `n` decoded bytes off the front of the buffer.
    pub fn consume(&mut self, n: usize) {
        assert!(self.buffered >= n);
        self.buffered -= n;
    }

    /// The upstream ended. Directly after the 0-size chunk this counts as
    /// "no trailers"; anywhere else decoding is incomplete.
    pub fn end_of_upstream(&mut self) -> Result<(), Error> {
        match self.state {
            State::Done => Ok(()),
            State::Trailers => {
                let untouched = self.trailer_parser.as_ref()
                    .map_or(true, |p| p.bytes_consumed() == 0);
                if untouched {
                    self.trailer_parser = None;
                    self.state = State::Done;
                    Ok(())
                } else {
                    Err(decode_err(DecodeKind::PrematureEnd, None))
                }
            }
            _ => Err(decode_err(DecodeKind::PrematureEnd, None)),
        }
    }

    /// Trailer headers, once decoding finished. Empty sections yield `None`.
    pub fn take_trailers(&mut self) -> Option<Headers> {
        match self.trailers.take() {
            Some(ref h) if h.is_empty() => None,
            other => other,
        }
    }
}

/// Append one encoded chunk to `out`. Empty input produces nothing, since a
/// zero-size chunk would terminate the stream.
pub fn encode_chunk(out: &mut Buf, data: &[u8]) {
    use std::io::Write;

    if data.is_empty() {
        return;
    }
    write!(out, "{:08X}\r\n", data.len())
        .expect("writing to a buffer always succeeds");
    out.extend(data);
    out.extend(b"\r\n");
}

/// Append the terminating sequence to `out`.
pub fn encode_end(out: &mut Buf) {
    out.extend(b"\r\n0\r\n");
}

#[cfg(test)]
mod test {
    use matches::assert_matches;
    use netbuf::Buf;

    use crate::error::{DecodeKind, Error, SizeKind};
    use super::{Decoder, encode_chunk, encode_end};

    fn buf_of(data: &[u8]) -> Buf {
        let mut buf = Buf::new();
        buf.extend(data);
        buf
    }

    #[test]
    fn single_chunk() {
        let mut buf = buf_of(b"5\r\nABCDE\r\n0\r\n\r\n");
        let mut dec = Decoder::new(8000);
        dec.parse(&mut buf).unwrap();
        assert!(dec.is_done());
        assert_eq!(dec.buffered(), 5);
        assert_eq!(&buf[..5], b"ABCDE");
        dec.consume(5);
        buf.consume(5);
        assert_eq!(dec.buffered(), 0);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn incremental_feeding() {
        let data: &[u8] = b"3\r\nabc\r\n4;ext=1\r\ndefg\r\n0\r\n\r\n";
        let mut buf = Buf::new();
        let mut dec = Decoder::new(8000);
        for &b in data {
            buf.extend(&[b]);
            dec.parse(&mut buf).unwrap();
        }
        assert!(dec.is_done());
        assert_eq!(&buf[..dec.buffered()], b"abcdefg");
    }

    #[test]
    fn trailers_are_parsed() {
        let mut buf = buf_of(b"1\r\nx\r\n0\r\nWeight: 12\r\n\r\n");
        let mut dec = Decoder::new(8000);
        dec.parse(&mut buf).unwrap();
        assert!(dec.is_done());
        assert_eq!(&buf[..dec.buffered()], b"x");
        let trailers = dec.take_trailers().unwrap();
        assert_eq!(trailers.get("weight"), Some(&b"12"[..]));
    }

    #[test]
    fn trailers_size_limited() {
        let mut buf = buf_of(b"0\r\nName: aaaaaaaaaaaaaaaa\r\n\r\n");
        let mut dec = Decoder::new(8);
        assert_matches!(dec.parse(&mut buf).unwrap_err(),
            Error::Size(ref e) if e.kind == SizeKind::Trailers);
    }

    #[test]
    fn overflow_by_digit_count() {
        let mut buf = buf_of(b"11111111111111111\r\n");
        let mut dec = Decoder::new(8000);
        assert_matches!(dec.parse(&mut buf).unwrap_err(),
            Error::Decode(ref e) if e.kind == DecodeKind::LongOverflow);
    }

    #[test]
    fn overflow_by_sign() {
        let mut buf = buf_of(b"FFFFFFFFFFFFFFFF\r\nx");
        let mut dec = Decoder::new(8000);
        assert_matches!(dec.parse(&mut buf).unwrap_err(),
            Error::Decode(ref e) if e.kind == DecodeKind::LongOverflow);
    }

    #[test]
    fn largest_legal_size() {
        let mut buf = buf_of(b"7FFFFFFFFFFFFFFF\r\nabc");
        let mut dec = Decoder::new(8000);
        dec.parse(&mut buf).unwrap();
        assert!(!dec.is_done());
        assert_eq!(dec.buffered(), 3);
    }

    #[test]
    fn quoted_extension_rejected() {
        let mut buf = buf_of(b"5;name=\"x\"\r\nABCDE\r\n0\r\n\r\n");
        let mut dec = Decoder::new(8000);
        assert_matches!(dec.parse(&mut buf).unwrap_err(),
            Error::Decode(ref e) if e.kind == DecodeKind::QuotedExtension);
    }

    #[test]
    fn missing_data_terminator() {
        let mut buf = buf_of(b"2\r\nabX");
        let mut dec = Decoder::new(8000);
        assert_matches!(dec.parse(&mut buf).unwrap_err(),
            Error::Decode(ref e) if e.kind == DecodeKind::MissingDataTerminator);
    }

    #[test]
    fn premature_end() {
        let mut buf = buf_of(b"5\r\nAB");
        let mut dec = Decoder::new(8000);
        dec.parse(&mut buf).unwrap();
        assert_matches!(dec.end_of_upstream().unwrap_err(),
            Error::Decode(ref e) if e.kind == DecodeKind::PrematureEnd);
    }

    #[test]
    fn end_right_after_last_chunk_means_no_trailers() {
        let mut buf = buf_of(b"1\r\nz\r\n0\r\n");
        let mut dec = Decoder::new(8000);
        dec.parse(&mut buf).unwrap();
        assert!(!dec.is_done());
        dec.end_of_upstream().unwrap();
        assert!(dec.is_done());
        assert!(dec.take_trailers().is_none());
    }

    #[test]
    fn encode_two_chunks() {
        let mut out = Buf::new();
        encode_chunk(&mut out, b"hello");
        encode_chunk(&mut out, b"world!");
        encode_end(&mut out);
        assert_eq!(&out[..],
            &b"00000005\r\nhello\r\n00000006\r\nworld!\r\n\r\n0\r\n"[..]);
    }

    #[test]
    fn encode_skips_empty_chunks() {
        let mut out = Buf::new();
        encode_chunk(&mut out, b"");
        encode_end(&mut out);
        assert_eq!(&out[..], &b"\r\n0\r\n"[..]);
    }

    #[test]
    fn encode_then_decode_roundtrip() {
        let chunks: [&[u8]; 3] = [b"hello", b" ", b"world!"];
        let mut wire = Buf::new();
        for chunk in &chunks {
            encode_chunk(&mut wire, chunk);
        }
        encode_end(&mut wire);

        let mut dec = Decoder::new(8000);
        dec.parse(&mut wire).unwrap();
        dec.end_of_upstream().unwrap();
        assert!(dec.is_done());
        assert_eq!(&wire[..dec.buffered()], b"hello world!");
    }
}
