//! Error taxonomy of the server
//!
//! Every failure that can surface while reading, dispatching or answering a
//! request is one of the variants below, and `Error::status` is the single
//! place that decides which HTTP status a failure maps to.

use std::fmt;
use std::io;

use crate::base_serializer::HeaderError;

/// What exactly went wrong while tokenizing a request head or trailers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseKind {
    /// The request line did not have three non-empty tokens
    RequestLine,
    /// A header line with no name before the colon
    EmptyHeaderName,
    /// Whitespace at the start of the first header line
    LeadingWhitespace,
    /// Whitespace inside or after a header name
    WhitespaceInName,
    /// A header line without a colon
    MissingColon,
    /// A control byte where field data was expected
    IllegalByte,
    /// The upstream finished before the section terminator
    PrematureEnd,
}

impl ParseKind {
    pub fn message(&self) -> &'static str {
        use self::ParseKind::*;
        match *self {
            RequestLine => "request-line parse error",
            EmptyHeaderName => "empty header name",
            LeadingWhitespace => "leading whitespace",
            WhitespaceInName => "whitespace in header name",
            MissingColon => "header line without a colon",
            IllegalByte => "illegal byte in header section",
            PrematureEnd => "upstream finished prematurely",
        }
    }
}

/// A head/trailers tokenizer failure with the position it happened at.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseKind,
    /// Byte before the offending one, if any
    pub prev: Option<u8>,
    /// The offending byte; `None` when the upstream ended
    pub curr: Option<u8>,
    /// Offset of `curr` from the start of the section
    pub pos: usize,
    /// Total bytes consumed by the parser
    pub count: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (prev={:?}, curr={:?}, pos={}, byte_count={})",
            self.kind.message(), self.prev, self.curr, self.pos, self.count)
    }
}

/// Which configured limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    Head,
    Body,
    Trailers,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeError {
    pub kind: SizeKind,
    pub configured_max: usize,
}

impl fmt::Display for SizeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match self.kind {
            SizeKind::Head => "request head",
            SizeKind::Body => "request body",
            SizeKind::Trailers => "request trailers",
        };
        write!(f, "{} exceeds {} bytes", what, self.configured_max)
    }
}

/// A chunked-transfer decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    /// More than 16 hex digits, or a value above `i64::MAX`
    LongOverflow,
    /// Quoted-string chunk-extension values are not supported
    QuotedExtension,
    /// A byte that is neither a hex digit nor `;` in the size line
    IllegalSizeByte,
    /// Chunk data was not followed by CRLF
    MissingDataTerminator,
    /// The upstream is empty but decoding is not done
    PrematureEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub kind: DecodeKind,
    /// The offending byte, when one exists
    pub byte: Option<u8>,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::DecodeKind::*;
        let msg = match self.kind {
            LongOverflow => "long overflow in chunk size",
            QuotedExtension => "quoted chunk-extension values are not supported",
            IllegalSizeByte => "illegal byte in chunk-size line",
            MissingDataTerminator => "chunk data not terminated by CRLF",
            PrematureEnd => "upstream is empty but decoding is not done",
        };
        match self.byte {
            Some(b) => write!(f, "{} (byte={:?})", msg, b as char),
            None => f.write_str(msg),
        }
    }
}

quick_error! {
    /// Anything that can go wrong within an exchange.
    #[derive(Debug)]
    pub enum Error {
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        Head(err: ParseError) {
            description("request head parse error")
            display("request head parse error: {}", err)
            from()
        }
        Size(err: SizeError) {
            description("configured size limit exceeded")
            display("{}", err)
            from()
        }
        Decode(err: DecodeError) {
            description("chunked decoding error")
            display("chunked decoding error: {}", err)
            from()
        }
        BadHeader(msg: &'static str) {
            description("bad header")
            display("bad header: {}", msg)
        }
        IllegalRequestBody(msg: &'static str) {
            description("illegal request body")
            display("illegal request body: {}", msg)
        }
        VersionTooOld(major: u8, minor: u8) {
            description("HTTP version too old")
            display("HTTP/{}.{} is below the configured minimum", major, minor)
        }
        VersionTooNew(major: u8, minor: u8) {
            description("HTTP version not supported")
            display("HTTP/{}.{} is not supported", major, minor)
        }
        BadVersion {
            description("unparseable HTTP version")
        }
        UnsupportedTransferCoding {
            description("the last transfer coding is not chunked")
        }
        MethodNotAllowed(allow: String) {
            description("method not allowed")
            display("method not allowed (allowed: {})", allow)
        }
        NoRouteFound(path: String) {
            description("no route found")
            display("no route found for {}", path)
        }
        NotAcceptable {
            description("no handler produces an acceptable media type")
        }
        UnsupportedMediaType {
            description("no handler consumes the request media type")
        }
        IllegalResponseBody(msg: &'static str) {
            description("illegal response body")
            display("illegal response body: {}", msg)
        }
        Serialize(err: HeaderError) {
            description("response serialization error")
            display("response serialization error: {}", err)
            from()
        }
        IllegalInterim(code: u16) {
            description("not an interim response")
            display("status {} is not an interim (1xx) response", code)
        }
        RejectedInterim(code: u16) {
            description("interim response rejected by HTTP/1.0 peer")
            display("interim response {} rejected: peer speaks HTTP/1.0", code)
        }
        IdleTimeout {
            description("idle connection timeout")
        }
        ConnectionClosed {
            description("connection closed by peer")
        }
    }
}

impl Error {
    /// The HTTP status this failure maps to, or `None` when the connection
    /// must be dropped without a response.
    pub fn status(&self) -> Option<u16> {
        use self::Error::*;
        match *self {
            Io(..) | IdleTimeout | ConnectionClosed => None,
            Head(..) => Some(400),
            Size(..) => Some(413),
            Decode(..) => Some(400),
            BadHeader(..) => Some(400),
            IllegalRequestBody(..) => Some(400),
            VersionTooOld(..) => Some(426),
            VersionTooNew(..) => Some(505),
            BadVersion => Some(400),
            UnsupportedTransferCoding => Some(501),
            MethodNotAllowed(..) => Some(405),
            NoRouteFound(..) => Some(404),
            NotAcceptable => Some(406),
            UnsupportedMediaType => Some(415),
            IllegalResponseBody(..) => Some(500),
            Serialize(..) => Some(500),
            IllegalInterim(..) => Some(500),
            RejectedInterim(..) => Some(500),
        }
    }

    /// Whether the connection framing can no longer be trusted after this
    /// failure, so the connection closes once the error response is flushed.
    pub fn must_close(&self) -> bool {
        use self::Error::*;
        match *self {
            Io(..) | IdleTimeout | ConnectionClosed => true,
            Head(..) | Size(..) | Decode(..) => true,
            BadHeader(..) | IllegalRequestBody(..) => true,
            BadVersion | VersionTooOld(..) | VersionTooNew(..) => true,
            UnsupportedTransferCoding => true,
            MethodNotAllowed(..) | NoRouteFound(..) => false,
            NotAcceptable | UnsupportedMediaType => false,
            IllegalResponseBody(..) | Serialize(..) | IllegalInterim(..)
                | RejectedInterim(..) => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapping() {
        let parse = Error::Head(ParseError {
            kind: ParseKind::RequestLine,
            prev: None, curr: Some(b' '), pos: 3, count: 3,
        });
        assert_eq!(parse.status(), Some(400));
        assert!(parse.must_close());

        let size = Error::Size(SizeError {
            kind: SizeKind::Head, configured_max: 8000,
        });
        assert_eq!(size.status(), Some(413));

        assert_eq!(Error::VersionTooOld(0, 9).status(), Some(426));
        assert_eq!(Error::VersionTooNew(2, 0).status(), Some(505));
        assert_eq!(Error::UnsupportedTransferCoding.status(), Some(501));
        assert_eq!(Error::NoRouteFound("/x".into()).status(), Some(404));
        assert!(!Error::NoRouteFound("/x".into()).must_close());
        assert_eq!(Error::IdleTimeout.status(), None);
    }
}
