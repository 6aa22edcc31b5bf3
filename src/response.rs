//! Immutable response values and factories for the common ones
//!
//! A `Response` is a plain value: status, reason, headers, body and a
//! must-close flag. Nothing happens until the connection machinery
//! serializes it. Responses for common status codes are pre-built in a
//! module-load-time cache and handed out by the factory functions below.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use futures::Stream;

use crate::enums::{Status, body_forbidden};
use crate::error::Error;
use crate::headers::Headers;
use crate::media_type::{MediaType, Score, best_score};
use crate::request::Request;

/// The body of a response.
pub enum ResponseBody {
    Empty,
    /// A body of known length, written with `Content-Length`
    Bytes(Cow<'static, [u8]>),
    /// A lazily produced body, written with chunked transfer coding
    Stream(Box<dyn Stream<Item = Vec<u8>, Error = Error>>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Bytes(ref b) => {
                write!(f, "Bytes({} bytes)", b.len())
            }
            ResponseBody::Stream(..) => f.write_str("Stream(..)"),
        }
    }
}

/// An immutable response value.
#[derive(Debug)]
pub struct Response {
    pub(crate) code: u16,
    pub(crate) reason: Cow<'static, str>,
    pub(crate) headers: Headers,
    pub(crate) body: ResponseBody,
    pub(crate) close: bool,
}

impl Response {
    /// Start building a response for a known status.
    pub fn builder(status: Status) -> ResponseBuilder {
        ResponseBuilder::new(status.code(), Cow::Borrowed(status.reason()))
    }

    /// Start building a response with a raw code and reason phrase.
    ///
    /// # Panics
    ///
    /// When the code is outside 100..=999.
    pub fn custom<R>(code: u16, reason: R) -> ResponseBuilder
        where R: Into<Cow<'static, str>>,
    {
        assert!(code >= 100 && code <= 999,
            "status code {} outside 100..=999", code);
        ResponseBuilder::new(code, reason.into())
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Whether this response demands closing the connection after it.
    pub fn must_close(&self) -> bool {
        self.close || crate::headers::is_close(
            self.headers.get("Connection").unwrap_or(b""))
    }

    pub fn is_informational(&self) -> bool {
        self.code < 200
    }

    pub fn is_error(&self) -> bool {
        self.code >= 400
    }
}

/// Builder for `Response` values.
#[derive(Debug)]
pub struct ResponseBuilder {
    code: u16,
    reason: Cow<'static, str>,
    headers: Headers,
    body: ResponseBody,
    close: bool,
}

impl ResponseBuilder {
    fn new(code: u16, reason: Cow<'static, str>) -> ResponseBuilder {
        ResponseBuilder {
            code,
            reason,
            headers: Headers::new(),
            body: ResponseBody::Empty,
            close: false,
        }
    }

    pub fn header<N, V>(mut self, name: N, value: V) -> ResponseBuilder
        where N: Into<String>, V: Into<Vec<u8>>,
    {
        self.headers.add(name, value);
        self
    }

    /// Mark the response as connection-closing.
    pub fn close(mut self) -> ResponseBuilder {
        self.close = true;
        self
    }

    pub fn body_bytes<B>(mut self, body: B) -> ResponseBuilder
        where B: Into<Cow<'static, [u8]>>,
    {
        self.body = ResponseBody::Bytes(body.into());
        self
    }

    pub fn body_stream(
        mut self, body: Box<dyn Stream<Item = Vec<u8>, Error = Error>>)
        -> ResponseBuilder
    {
        self.body = ResponseBody::Stream(body);
        self
    }

    /// Validate and freeze the response.
    ///
    /// Building fails when a body is attached to a status code that forbids
    /// one (1xx, 204, 304); streamed bodies are re-checked at write time.
    pub fn build(self) -> Result<Response, Error> {
        let has_body = !matches!(self.body, ResponseBody::Empty);
        if has_body && body_forbidden(self.code) {
            return Err(Error::IllegalResponseBody(
                "status code forbids a message body"));
        }
        Ok(Response {
            code: self.code,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
            close: self.close,
        })
    }
}

struct Canned {
    status: Status,
    close: bool,
    headers: &'static [(&'static str, &'static [u8])],
}

const NO_HEADERS: &[(&str, &[u8])] = &[];
const UPGRADE_HEADERS: &[(&str, &[u8])] = &[
    ("Upgrade", b"HTTP/1.1"),
    ("Connection", b"upgrade"),
];

lazy_static! {
    static ref CACHE: HashMap<u16, Canned> = {
        use crate::enums::Status::*;
        let mut map = HashMap::new();
        let plain = [
            Continue, Processing, Ok, Accepted, NoContent,
            Forbidden, NotFound, MethodNotAllowed, NotAcceptable,
            PreconditionFailed, UnsupportedMediaType, ImATeapot,
            InternalServerError, NotImplemented, HttpVersionNotSupported,
        ];
        for &status in plain.iter() {
            map.insert(status.code(), Canned {
                status, close: false, headers: NO_HEADERS,
            });
        }
        // these ones close the connection
        for &status in [BadRequest, RequestTimeout, PayloadTooLarge,
                        ServiceUnavailable].iter() {
            map.insert(status.code(), Canned {
                status, close: true, headers: NO_HEADERS,
            });
        }
        map.insert(UpgradeRequired.code(), Canned {
            status: UpgradeRequired,
            close: false,
            headers: UPGRADE_HEADERS,
        });
        map
    };
}

/// A status-only response, from the cache when the code is a common one.
pub fn status(status: Status) -> Response {
    match CACHE.get(&status.code()) {
        Some(canned) => {
            let mut headers = Headers::new();
            for &(name, value) in canned.headers {
                headers.add(name, value);
            }
            Response {
                code: canned.status.code(),
                reason: Cow::Borrowed(canned.status.reason()),
                headers,
                body: ResponseBody::Empty,
                close: canned.close,
            }
        }
        None => {
            Response::builder(status).build()
                .expect("a bodyless response is always valid")
        }
    }
}

pub fn ok() -> Response {
    status(Status::Ok)
}

pub fn no_content() -> Response {
    status(Status::NoContent)
}

pub fn bad_request() -> Response {
    status(Status::BadRequest)
}

pub fn not_found() -> Response {
    status(Status::NotFound)
}

pub fn payload_too_large() -> Response {
    status(Status::PayloadTooLarge)
}

pub fn internal_server_error() -> Response {
    status(Status::InternalServerError)
}

pub fn upgrade_required() -> Response {
    status(Status::UpgradeRequired)
}

/// 405 with the `Allow` header listing the route's methods.
pub fn method_not_allowed(allow: &str) -> Response {
    let mut resp = status(Status::MethodNotAllowed);
    resp.headers.add("Allow", allow.as_bytes());
    resp
}

/// The 204 answer for an OPTIONS request no handler implements.
pub fn options_no_content(allow: &str) -> Response {
    let mut resp = status(Status::NoContent);
    resp.headers.add("Allow", allow.as_bytes());
    resp
}

/// An interim 100 (Continue) response.
pub fn interim_continue() -> Response {
    status(Status::Continue)
}

fn with_text_body(subtype: &str, charset: &'static str, body: String)
    -> Response
{
    Response::custom(200, "OK")
        .header("Content-Type",
                format!("text/{}; charset={}", subtype, charset))
        .body_bytes(body.into_bytes())
        .build()
        .expect("a 200 response accepts a body")
}

/// A 200 response with a `text/plain; charset=utf-8` body.
pub fn text<B: Into<String>>(body: B) -> Response {
    with_text_body("plain", "utf-8", body.into())
}

/// A 200 response with a `text/html; charset=utf-8` body.
pub fn html<B: Into<String>>(body: B) -> Response {
    with_text_body("html", "utf-8", body.into())
}

/// A 200 response with an `application/json; charset=utf-8` body.
pub fn json<B: Into<String>>(body: B) -> Response {
    Response::custom(200, "OK")
        .header("Content-Type", &b"application/json; charset=utf-8"[..])
        .body_bytes(body.into().into_bytes())
        .build()
        .expect("a 200 response accepts a body")
}

/// `text`, with the charset negotiated against the request's Accept header.
pub fn text_for<B: Into<String>>(body: B, req: &Request) -> Response {
    let body = body.into();
    let charset = negotiate_charset("plain", req, &body);
    with_text_body("plain", charset, body)
}

/// `html`, with the charset negotiated against the request's Accept header.
pub fn html_for<B: Into<String>>(body: B, req: &Request) -> Response {
    let body = body.into();
    let charset = negotiate_charset("html", req, &body);
    with_text_body("html", charset, body)
}

/// The encodings this crate can actually produce. Anything the peer asks
/// for beyond these falls back to UTF-8, as does a winner that cannot
/// encode the body.
const CHARSETS: &[&str] = &["utf-8", "us-ascii"];

fn negotiate_charset(subtype: &str, req: &Request, body: &str)
    -> &'static str
{
    let ranges = req.accept();
    let mut best: (Score, f32, &'static str) = (Score::Nope, 0.0, "utf-8");
    for &cs in CHARSETS {
        let h = MediaType::new("text", subtype).with_param("charset", cs);
        let (s, q) = best_score(&h, ranges);
        if s > best.0 || (s == best.0 && q > best.1) {
            best = (s, q, cs);
        }
    }
    let winner = if best.0 == Score::Nope { "utf-8" } else { best.2 };
    if winner == "us-ascii" && !body.is_ascii() {
        "utf-8"
    } else {
        winner
    }
}

#[cfg(test)]
mod test {
    use matches::assert_matches;

    use crate::enums::Status;
    use crate::error::Error;
    use super::{Response, ResponseBody, status, text, method_not_allowed};

    #[test]
    fn cached_closing_codes() {
        for &code in &[400u16, 408, 413, 503] {
            let resp = match code {
                400 => status(Status::BadRequest),
                408 => status(Status::RequestTimeout),
                413 => status(Status::PayloadTooLarge),
                _ => status(Status::ServiceUnavailable),
            };
            assert_eq!(resp.code(), code);
            assert!(resp.must_close(), "{} should close", code);
        }
        assert!(!status(Status::NotFound).must_close());
    }

    #[test]
    fn upgrade_required_headers() {
        let resp = status(Status::UpgradeRequired);
        assert_eq!(resp.code(), 426);
        assert_eq!(resp.headers().get("Upgrade"), Some(&b"HTTP/1.1"[..]));
        assert_eq!(resp.headers().get("Connection"), Some(&b"upgrade"[..]));
    }

    #[test]
    fn text_sets_content_type() {
        let resp = text("hello");
        assert_eq!(resp.code(), 200);
        assert_eq!(resp.headers().get_str("Content-Type"),
                   Some("text/plain; charset=utf-8"));
        assert_matches!(*resp.body(), ResponseBody::Bytes(ref b)
            if &b[..] == b"hello");
    }

    #[test]
    fn builder_rejects_body_on_bodyless_status() {
        let err = Response::builder(Status::NoContent)
            .body_bytes(&b"nope"[..])
            .build()
            .unwrap_err();
        assert_matches!(err, Error::IllegalResponseBody(..));
        assert!(Response::builder(Status::NoContent).build().is_ok());
    }

    #[test]
    fn allow_header() {
        let resp = method_not_allowed("GET, HEAD");
        assert_eq!(resp.code(), 405);
        assert_eq!(resp.headers().get_str("Allow"), Some("GET, HEAD"));
    }

    #[test]
    fn explicit_connection_close_header() {
        let resp = Response::custom(200, "OK")
            .header("Connection", &b"close"[..])
            .build().unwrap();
        assert!(resp.must_close());
    }
}
