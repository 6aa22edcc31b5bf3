//! Wire serializer for responses
//!
//! A per-exchange state machine that guarantees whatever ends up in the
//! output buffer is a consistent HTTP message: interim responses only before
//! the status line, exactly one way to declare the body length, no body
//! bytes for HEAD requests or bodyless status codes.
//!
//! Note: while we pass the buffer to each method, we expect that the same
//! buffer is passed each time.

use std::fmt::Display;
use std::io::Write;

use netbuf::Buf;

use crate::enums::Version;
use crate::headers::Headers;

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        InvalidHeaderName {
            description("header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("header value contains invalid characters")
        }
        TransferEncodingAfterContentLength {
            description("Transfer-Encoding added when Content-Length is \
                already specified")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        CantDetermineBodySize {
            description("neither Content-Length nor Transfer-Encoding \
                is present in the headers")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set \
                using the specialized methods")
        }
        RequireBodyless {
            description("this message must not contain body length fields")
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyMode {
    /// Message contains a body.
    Normal,
    /// Message body is ignored: responses to HEAD requests.
    Head,
    /// Message must not have a body: all 1xx (Informational),
    /// 204 (No Content), and 304 (Not Modified) responses
    Denied,
}

#[derive(Debug)]
pub enum MessageState {
    /// Nothing has been sent, apart from any interim responses.
    ResponseStart { version: Version, body: BodyMode, close: bool },
    /// Status line is already in the buffer.
    Headers { body: BodyMode, close: bool },
    /// The message contains a fixed size body.
    FixedHeaders { is_head: bool, close: bool, content_length: u64 },
    /// The message contains a chunked body.
    ChunkedHeaders { is_head: bool, close: bool },
    /// The message contains no body.
    Bodyless,
    /// The message contains a body with the given length.
    FixedBody { is_head: bool, content_length: u64 },
    /// The message contains a chunked body.
    ChunkedBody { is_head: bool },
    /// A message in final state.
    Done,
}

fn invalid_header(value: &[u8]) -> bool {
    value.iter().any(|&x| x == b'\r' || x == b'\n')
}

impl MessageState {
    /// Fresh serializer state for one exchange.
    pub fn start(version: Version, is_head: bool, close: bool)
        -> MessageState
    {
        MessageState::ResponseStart {
            version,
            body: if is_head { BodyMode::Head } else { BodyMode::Normal },
            close,
        }
    }

    /// Flip the close flag before the status line is written.
    pub fn set_close(&mut self, value: bool) {
        if let MessageState::ResponseStart { ref mut close, .. } = *self {
            *close = value;
        }
    }

    /// Write an interim (1xx) response in full. Any number may precede the
    /// final status line.
    ///
    /// # Panics
    ///
    /// When the final response is already started, or the code is not 1xx.
    pub fn response_interim(&mut self, buf: &mut Buf, code: u16,
        reason: &str, headers: &Headers)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        assert!(code >= 100 && code < 200);
        match *self {
            ResponseStart { version, .. } => {
                let start = buf.len();
                write!(buf, "{} {} {}\r\n", version, code, reason).unwrap();
                for (name, value) in headers.iter() {
                    if invalid_header(name.as_bytes()) {
                        buf.remove_range(start..);
                        return Err(HeaderError::InvalidHeaderName);
                    }
                    if invalid_header(value) {
                        buf.remove_range(start..);
                        return Err(HeaderError::InvalidHeaderValue);
                    }
                    buf.write_all(name.as_bytes()).unwrap();
                    buf.write_all(b": ").unwrap();
                    buf.write_all(value).unwrap();
                    buf.write_all(b"\r\n").unwrap();
                }
                buf.write_all(b"\r\n").unwrap();
                Ok(())
            }
            ref state => {
                panic!("Called response_interim() method on response \
                    in state {:?}", state)
            }
        }
    }

    /// Write the final status line.
    ///
    /// # Panics
    ///
    /// When the status line is already written, or the code is informational
    /// (interim responses go through `response_interim`).
    pub fn response_status(&mut self, buf: &mut Buf, code: u16, reason: &str) {
        use self::BodyMode::*;
        use self::MessageState::*;
        match *self {
            ResponseStart { version, mut body, close } => {
                assert!(code >= 200 && code <= 999);
                write!(buf, "{} {} {}\r\n", version, code, reason).unwrap();
                // Responses without body: 204, 304 (1xx never get here)
                if code == 204 || code == 304 {
                    body = Denied
                }
                *self = Headers { body, close };
            }
            ref state => {
                panic!("Called response_status() method on response \
                    in state {:?}", state)
            }
        }
    }

    fn write_header(&mut self, buf: &mut Buf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        buf.write_all(name.as_bytes()).unwrap();
        buf.write_all(b": ").unwrap();

        let value_start = buf.len();
        buf.write_all(value).unwrap();
        if invalid_header(&buf[value_start..]) {
            buf.remove_range(start..);
            return Err(HeaderError::InvalidHeaderValue);
        }

        buf.write_all(b"\r\n").unwrap();
        Ok(())
    }

    fn write_formatted<D: Display>(&mut self, buf: &mut Buf,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        buf.write_all(name.as_bytes()).unwrap();
        buf.write_all(b": ").unwrap();

        let value_start = buf.len();
        write!(buf, "{}", value).unwrap();
        if invalid_header(&buf[value_start..]) {
            buf.remove_range(start..);
            return Err(HeaderError::InvalidHeaderValue);
        }

        buf.write_all(b"\r\n").unwrap();
        Ok(())
    }

    /// Add a header to the message.
    ///
    /// `Content-Length` and `Transfer-Encoding` must be set through
    /// `add_length` and `add_chunked`; these two headers decide message
    /// framing and are important for the security of HTTP.
    ///
    /// # Panics
    ///
    /// Panics when `add_header` is called in the wrong state.
    pub fn add_header(&mut self, buf: &mut Buf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(HeaderError::BodyLengthHeader)
        }
        match *self {
            Headers { .. } | FixedHeaders { .. } | ChunkedHeaders { .. } => {
                self.write_header(buf, name, value)?;
                Ok(())
            }
            ref state => {
                panic!("Called add_header() method on a message in state {:?}",
                       state)
            }
        }
    }

    /// Same as `add_header` but allows the value to be formatted directly
    /// into the buffer. Useful for dates and numeric headers.
    pub fn format_header<D: Display>(&mut self, buf: &mut Buf,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(HeaderError::BodyLengthHeader)
        }
        match *self {
            Headers { .. } | FixedHeaders { .. } | ChunkedHeaders { .. } => {
                self.write_formatted(buf, name, value)?;
                Ok(())
            }
            ref state => {
                panic!("Called format_header() method on a message \
                    in state {:?}", state)
            }
        }
    }

    /// Add a content length to the message.
    ///
    /// # Panics
    ///
    /// Panics when `add_length` is called in the wrong state.
    pub fn add_length(&mut self, buf: &mut Buf, n: u64)
        -> Result<(), HeaderError> {
        use self::BodyMode::*;
        use self::MessageState::*;
        match *self {
            FixedHeaders { .. } => Err(HeaderError::DuplicateContentLength),
            ChunkedHeaders { .. } =>
                Err(HeaderError::ContentLengthAfterTransferEncoding),
            Headers { body: Denied, .. } => Err(HeaderError::RequireBodyless),
            Headers { body, close } => {
                self.write_formatted(buf, "Content-Length", n)?;
                *self = FixedHeaders { is_head: body == Head,
                                       close,
                                       content_length: n };
                Ok(())
            }
            ref state => {
                panic!("Called add_length() method on message in state {:?}",
                       state)
            }
        }
    }

    /// Sets the transfer encoding to chunked.
    ///
    /// # Panics
    ///
    /// Panics when `add_chunked` is called in the wrong state.
    pub fn add_chunked(&mut self, buf: &mut Buf)
        -> Result<(), HeaderError> {
        use self::BodyMode::*;
        use self::MessageState::*;
        match *self {
            FixedHeaders { .. } =>
                Err(HeaderError::TransferEncodingAfterContentLength),
            ChunkedHeaders { .. } =>
                Err(HeaderError::DuplicateTransferEncoding),
            Headers { body: Denied, .. } => Err(HeaderError::RequireBodyless),
            Headers { body, close } => {
                self.write_header(buf, "Transfer-Encoding", b"chunked")?;
                *self = ChunkedHeaders { is_head: body == Head, close };
                Ok(())
            }
            ref state => {
                panic!("Called add_chunked() method on message in state {:?}",
                       state)
            }
        }
    }

    /// Returns true if at least the final status line has been written.
    ///
    /// This is mostly useful to find out whether we can still substitute an
    /// error page or it's already too late.
    pub fn is_started(&self) -> bool {
        !matches!(*self, MessageState::ResponseStart { .. })
    }

    /// Closes the HTTP header and returns `true` if an entity body is
    /// expected.
    ///
    /// Specifically `false` is returned when the status is 204, 304 or the
    /// response answers a HEAD request, but not if the body has zero length.
    ///
    /// # Panics
    ///
    /// Panics when the response is in a wrong state.
    pub fn done_headers(&mut self, buf: &mut Buf)
        -> Result<bool, HeaderError>
    {
        use self::BodyMode::*;
        use self::MessageState::*;
        if matches!(*self,
                    Headers { close: true, .. } |
                    FixedHeaders { close: true, .. } |
                    ChunkedHeaders { close: true, .. }) {
            self.add_header(buf, "Connection", b"close").unwrap();
        }
        let expect_body = match *self {
            Headers { body: Denied, .. } => {
                *self = Bodyless;
                false
            }
            Headers { body: Normal, .. } => {
                return Err(HeaderError::CantDetermineBodySize);
            }
            Headers { body: Head, .. } => {
                // a HEAD response without explicit length headers
                *self = Bodyless;
                false
            }
            FixedHeaders { is_head, content_length, .. } => {
                *self = FixedBody { is_head, content_length };
                !is_head
            }
            ChunkedHeaders { is_head, .. } => {
                *self = ChunkedBody { is_head };
                !is_head
            }
            ref state => {
                panic!("Called done_headers() method on message \
                    in state {:?}", state)
            }
        };
        buf.write(b"\r\n").unwrap();
        Ok(expect_body)
    }

    /// Write a chunk of the message body.
    ///
    /// Works both for fixed-size and chunked bodies. For the chunked body
    /// each chunk is put into the buffer immediately, prefixed by its size;
    /// empty chunks are ignored. Bodies of responses to HEAD requests are
    /// silently dropped.
    ///
    /// # Panics
    ///
    /// When the response is in the wrong state or would overflow the
    /// declared content length.
    pub fn write_body(&mut self, buf: &mut Buf, data: &[u8]) {
        use self::MessageState::*;
        match *self {
            Bodyless => panic!("Message must not contain body."),
            FixedBody { is_head, ref mut content_length } => {
                if data.len() as u64 > *content_length {
                    panic!("Fixed size response error. \
                        Bytes left {} but got additional {}",
                        content_length, data.len());
                }
                if !is_head {
                    buf.write(data).unwrap();
                }
                *content_length -= data.len() as u64;
            }
            ChunkedBody { is_head } => if !is_head && data.len() > 0 {
                write!(buf, "{:08X}\r\n", data.len()).unwrap();
                buf.write(data).unwrap();
                buf.write(b"\r\n").unwrap();
            },
            ref state => {
                panic!("Called write_body() method on message \
                    in state {:?}", state)
            }
        }
    }

    /// Returns true if headers are already sent (buffered).
    pub fn is_after_headers(&self) -> bool {
        use self::MessageState::*;
        matches!(*self, Bodyless | Done |
            FixedBody {..} | ChunkedBody {..})
    }

    /// Returns true if the `done()` method was already called and everything
    /// was okay.
    pub fn is_complete(&self) -> bool {
        matches!(*self, MessageState::Done)
    }

    /// Writes the finalization data into the buffer and asserts that the
    /// response is in the appropriate state for that.
    ///
    /// The method may be called multiple times.
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state or the body is not finished.
    pub fn done(&mut self, buf: &mut Buf) {
        use self::MessageState::*;
        match *self {
            Bodyless => *self = Done,
            // Don't check responses to HEAD requests if a body was written.
            FixedBody { is_head: true, .. } |
            ChunkedBody { is_head: true } => *self = Done,
            FixedBody { is_head: false, content_length: 0 } => *self = Done,
            FixedBody { is_head: false, content_length } =>
                panic!("Tried to close message with {} bytes remaining.",
                       content_length),
            ChunkedBody { is_head: false } => {
                buf.write(b"0\r\n\r\n").unwrap();
                *self = Done;
            }
            Done => {}  // multiple invocations are okay.
            ref state => {
                panic!("Called done() method on response in state {:?}",
                       state);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use netbuf::Buf;

    use crate::enums::Version;
    use crate::headers::Headers;
    use super::MessageState;

    fn do_response10<F>(fun: F) -> Buf
        where F: FnOnce(MessageState, &mut Buf)
    {
        let mut buf = Buf::new();
        fun(MessageState::start(Version::Http10, false, false), &mut buf);
        buf
    }
    fn do_response11<F>(close: bool, fun: F) -> Buf
        where F: FnOnce(MessageState, &mut Buf)
    {
        let mut buf = Buf::new();
        fun(MessageState::start(Version::Http11, false, close), &mut buf);
        buf
    }

    fn do_head_response11<F>(close: bool, fun: F)
        -> Buf
        where F: FnOnce(MessageState, &mut Buf)
    {
        let mut buf = Buf::new();
        fun(MessageState::start(Version::Http11, true, close), &mut buf);
        buf
    }

    #[test]
    fn minimal_response() {
        assert_eq!(&do_response10(|mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf).unwrap();
        })[..], "HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n".as_bytes());
    }

    #[test]
    fn minimal_response11() {
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf).unwrap();
        })[..], "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".as_bytes());
    }

    #[test]
    fn close_response11() {
        assert_eq!(&do_response11(true, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf).unwrap();
        })[..], concat!("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n",
                        "Connection: close\r\n\r\n").as_bytes());
    }

    #[test]
    fn head_response() {
        // The response to a HEAD request may declare the real body length,
        // but the body bytes themselves are dropped.
        assert_eq!(&do_head_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 500).unwrap();
            msg.done_headers(buf).unwrap();
            msg.write_body(buf, b"ignored");
            msg.done(buf);
        })[..], "HTTP/1.1 200 OK\r\nContent-Length: 500\r\n\r\n".as_bytes());
    }

    #[test]
    fn no_content_denies_length() {
        // 204 must not carry body length fields.
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 204, "No Content");
            msg.add_length(buf, 500).unwrap_err();
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        })[..], "HTTP/1.1 204 No Content\r\n\r\n".as_bytes());
    }

    #[test]
    fn chunked_body_framing() {
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_status(buf, 200, "OK");
            msg.add_chunked(buf).unwrap();
            msg.done_headers(buf).unwrap();
            msg.write_body(buf, b"hello");
            msg.write_body(buf, b"");
            msg.done(buf);
        })[..], concat!("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n",
                        "\r\n00000005\r\nhello\r\n0\r\n\r\n").as_bytes());
    }

    #[test]
    fn interim_before_final() {
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_interim(buf, 100, "Continue", &Headers::new())
                .unwrap();
            assert!(!msg.is_started());
            msg.response_status(buf, 200, "OK");
            msg.add_length(buf, 2).unwrap();
            msg.done_headers(buf).unwrap();
            msg.write_body(buf, b"ok");
            msg.done(buf);
        })[..], concat!("HTTP/1.1 100 Continue\r\n\r\n",
                        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n",
                        "\r\nok").as_bytes());
    }

    #[test]
    fn interim_with_headers() {
        let mut headers = Headers::new();
        headers.add("Link", &b"</style.css>; rel=preload"[..]);
        assert_eq!(&do_response11(false, |mut msg, buf| {
            msg.response_interim(buf, 103, "Early Hints", &headers).unwrap();
            msg.response_status(buf, 204, "No Content");
            msg.done_headers(buf).unwrap();
            msg.done(buf);
        })[..], concat!("HTTP/1.1 103 Early Hints\r\n",
                        "Link: </style.css>; rel=preload\r\n\r\n",
                        "HTTP/1.1 204 No Content\r\n\r\n").as_bytes());
    }
}
