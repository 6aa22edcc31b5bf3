//! Byte-level tokenizer for request heads and trailer sections
//!
//! The parser is resumable: it is fed whatever slice of the connection
//! buffer is available and reports how much of it was consumed, so an
//! arbitrarily fragmented upstream works without re-scanning. Line endings
//! are handled uniformly everywhere: CRLF is canonical, a bare LF also
//! terminates a line, a bare CR is skipped.

use crate::enums::Version;
use crate::error::{Error, ParseError, ParseKind, SizeError, SizeKind};
use crate::headers::Headers;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// A fully tokenized request head.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    /// The raw version token, e.g. `HTTP/1.1`; see `parse_version_token`
    pub version: String,
    pub headers: Headers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Request,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    LineStart,
    Name,
    ValueStart,
    Value,
    Done,
}

/// Streaming parser for a request line plus headers, or a trailer section.
#[derive(Debug)]
pub struct HeadParser {
    mode: Mode,
    state: State,
    max: usize,
    prev: Option<u8>,
    count: usize,
    line: Vec<u8>,
    name: Vec<u8>,
    value: Vec<u8>,
    pending: Option<(Vec<u8>, Vec<u8>)>,
    method: String,
    target: String,
    version: String,
    headers: Headers,
}

impl HeadParser {
    /// A parser for `request-line CRLF *(header CRLF) CRLF`.
    pub fn request(max: usize) -> HeadParser {
        HeadParser::new(Mode::Request, State::RequestLine, max)
    }

    /// A parser for a bare header section (chunked trailers).
    pub fn trailers(max: usize) -> HeadParser {
        HeadParser::new(Mode::Trailers, State::LineStart, max)
    }

    fn new(mode: Mode, state: State, max: usize) -> HeadParser {
        HeadParser {
            mode, state, max,
            prev: None,
            count: 0,
            line: Vec::new(),
            name: Vec::new(),
            value: Vec::new(),
            pending: None,
            method: String::new(),
            target: String::new(),
            version: String::new(),
            headers: Headers::new(),
        }
    }

    /// Consume bytes from `data` until the section terminator or the end of
    /// the slice. Returns how many bytes were consumed and whether the
    /// section is complete. The caller removes the consumed bytes from its
    /// buffer; unconsumed bytes belong to the message body or to the next
    /// request.
    pub fn feed(&mut self, data: &[u8]) -> Result<(usize, bool), Error> {
        let mut consumed = 0;
        for &b in data {
            if self.state == State::Done {
                break;
            }
            // the byte that would push the section past the limit is
            // rejected before it is looked at
            if self.count >= self.max {
                return Err(SizeError {
                    kind: self.size_kind(),
                    configured_max: self.max,
                }.into());
            }
            self.step(b)?;
            self.count += 1;
            consumed += 1;
            self.prev = Some(b);
        }
        Ok((consumed, self.state == State::Done))
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn bytes_consumed(&self) -> usize {
        self.count
    }

    /// The error to report when the upstream ends before the terminator.
    pub fn premature_end(&self) -> Error {
        self.fail_at(ParseKind::PrematureEnd, None)
    }

    /// The tokenized head. Call after `feed` reported completion.
    pub fn into_head(self) -> RequestHead {
        debug_assert!(self.state == State::Done);
        RequestHead {
            method: self.method,
            target: self.target,
            version: self.version,
            headers: self.headers,
        }
    }

    /// The tokenized trailer section. Call after `feed` reported completion.
    pub fn into_headers(self) -> Headers {
        debug_assert!(self.state == State::Done);
        self.headers
    }

    fn size_kind(&self) -> SizeKind {
        match self.mode {
            Mode::Request => SizeKind::Head,
            Mode::Trailers => SizeKind::Trailers,
        }
    }

    fn fail_at(&self, kind: ParseKind, curr: Option<u8>) -> Error {
        ParseError {
            kind,
            prev: self.prev,
            curr,
            pos: self.count,
            count: self.count,
        }.into()
    }

    fn step(&mut self, b: u8) -> Result<(), Error> {
        use self::State::*;
        match self.state {
            RequestLine => match b {
                CR => {}
                LF => {
                    // empty lines before the request line are skipped
                    if !self.line.is_empty() {
                        self.parse_request_line(b)?;
                        self.state = LineStart;
                    }
                }
                b if b < 0x20 && b != b'\t' || b >= 0x7f => {
                    return Err(self.fail_at(ParseKind::RequestLine, Some(b)));
                }
                b => self.line.push(b),
            },
            LineStart => match b {
                CR => {}
                LF => {
                    self.commit_pending();
                    self.state = Done;
                }
                b' ' | b'\t' => {
                    // a continuation of the previous value: the leading
                    // whitespace collapses to one SP
                    match self.pending.take() {
                        Some((name, mut value)) => {
                            value.push(b' ');
                            self.name = name;
                            self.value = value;
                            self.state = ValueStart;
                        }
                        None => {
                            return Err(self.fail_at(
                                ParseKind::LeadingWhitespace, Some(b)));
                        }
                    }
                }
                b':' => {
                    return Err(self.fail_at(
                        ParseKind::EmptyHeaderName, Some(b)));
                }
                b if b < 0x20 || b >= 0x7f => {
                    return Err(self.fail_at(ParseKind::IllegalByte, Some(b)));
                }
                b => {
                    self.commit_pending();
                    self.name.clear();
                    self.value.clear();
                    self.name.push(b);
                    self.state = Name;
                }
            },
            Name => match b {
                b':' => self.state = ValueStart,
                b' ' | b'\t' => {
                    return Err(self.fail_at(
                        ParseKind::WhitespaceInName, Some(b)));
                }
                CR => {}
                LF => {
                    return Err(self.fail_at(ParseKind::MissingColon, Some(b)));
                }
                b if b < 0x20 || b >= 0x7f => {
                    return Err(self.fail_at(ParseKind::IllegalByte, Some(b)));
                }
                b => self.name.push(b),
            },
            ValueStart => match b {
                b' ' | b'\t' | CR => {}
                LF => {
                    self.finish_header_line();
                    self.state = LineStart;
                }
                b if b < 0x20 || b == 0x7f => {
                    return Err(self.fail_at(ParseKind::IllegalByte, Some(b)));
                }
                b => {
                    self.value.push(b);
                    self.state = Value;
                }
            },
            Value => match b {
                CR => {}
                LF => {
                    self.finish_header_line();
                    self.state = LineStart;
                }
                b' ' | b'\t' => self.value.push(b),
                b if b < 0x20 || b == 0x7f => {
                    return Err(self.fail_at(ParseKind::IllegalByte, Some(b)));
                }
                b => self.value.push(b),
            },
            Done => {}
        }
        Ok(())
    }

    fn parse_request_line(&mut self, curr: u8) -> Result<(), Error> {
        let mut tokens = Vec::with_capacity(3);
        for tok in self.line.split(|&b| b == b' ' || b == b'\t') {
            if !tok.is_empty() {
                tokens.push(tok);
            }
        }
        if tokens.len() != 3 {
            return Err(self.fail_at(ParseKind::RequestLine, Some(curr)));
        }
        self.method = String::from_utf8_lossy(tokens[0]).into_owned();
        self.target = String::from_utf8_lossy(tokens[1]).into_owned();
        self.version = String::from_utf8_lossy(tokens[2]).into_owned();
        self.line.clear();
        Ok(())
    }

    fn finish_header_line(&mut self) {
        while self.value.last().map_or(false, |&b| b == b' ' || b == b'\t') {
            self.value.pop();
        }
        let name = ::std::mem::replace(&mut self.name, Vec::new());
        let value = ::std::mem::replace(&mut self.value, Vec::new());
        self.pending = Some((name, value));
    }

    fn commit_pending(&mut self) {
        if let Some((name, value)) = self.pending.take() {
            let name = String::from_utf8_lossy(&name).into_owned();
            self.headers.add(name, value);
        }
    }
}

/// Map a version token to a `Version`, or to the error that decides the
/// response status: 426 below HTTP/1.0, 505 for HTTP/2 and above, 400 for
/// anything unparseable.
pub fn parse_version_token(token: &str) -> Result<Version, Error> {
    if !token.starts_with("HTTP/") {
        return Err(Error::BadVersion);
    }
    let digits = &token[5..];
    let (major, minor) = match digits.find('.') {
        Some(dot) => {
            let major = digits[..dot].parse::<u8>()
                .map_err(|_| Error::BadVersion)?;
            let minor = digits[dot+1..].parse::<u8>()
                .map_err(|_| Error::BadVersion)?;
            (major, minor)
        }
        None => {
            let major = digits.parse::<u8>()
                .map_err(|_| Error::BadVersion)?;
            (major, 0)
        }
    };
    match (major, minor) {
        (1, 0) => Ok(Version::Http10),
        (1, 1) => Ok(Version::Http11),
        (0, m) => Err(Error::VersionTooOld(0, m)),
        (1, _) => Err(Error::BadVersion),
        (mj, mn) => Err(Error::VersionTooNew(mj, mn)),
    }
}
