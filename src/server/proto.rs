//! A low-level HTTP/1.x server protocol handler
//!
//! One `Proto` drives one connection: it parses request heads, dispatches
//! into the router, polls the handler future (which pulls the body lazily
//! through the shared channel), serializes the response, and then either
//! starts over or closes. Everything on a connection is strictly
//! sequential.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Async, Future, Poll, Stream};
use futures::future;
use tokio_core::reactor::{Handle, Timeout};
use tokio_io::{AsyncRead, AsyncWrite};

use crate::chunked::Decoder;
use crate::enums::{Status, Version};
use crate::error::Error;
use crate::head_parser::{HeadParser, RequestHead, parse_version_token};
use crate::media_type::{self, MediaRange, MediaType};
use crate::request::Request;
use crate::response::{self, Response};
use crate::router::{HandlerFuture, Router};
use super::channel::{BodyProgress, Channel, ReadOutcome, WriteOutcome};
use super::{Config, ConnGuard, ServerShared};

/// Stop feeding a streamed body into the buffer once this much output is
/// pending.
const WRITE_WATERMARK: usize = 65536;

enum State {
    /// Waiting for (more of) a request head
    ReadHead(HeadParser),
    /// A handler future runs; body reads and interim responses go through
    /// the shared channel
    Running(HandlerFuture),
    /// Streaming a chunked response body
    WriteStream {
        stream: Box<dyn Stream<Item = Vec<u8>, Error = Error>>,
        close: bool,
    },
    /// Pushing the buffered response out
    Flush { close: bool },
    /// Discarding an unconsumed request body before the next exchange
    Drain { drained: u64 },
    /// Flushing whatever is left, then dropping the connection
    Closing,
    Closed,
}

struct IdleTimer {
    handle: Option<Handle>,
    timeout: Option<Timeout>,
    dur: Duration,
}

impl IdleTimer {
    /// Arm/poll the timer for an outstanding I/O operation; true on expiry.
    ///
    /// Without pending socket I/O (a handler suspended on something of its
    /// own) the timer is cleared: it only ever measures channel reads and
    /// writes.
    fn check(&mut self, io_blocked: bool, progressed: bool) -> bool {
        let handle = match self.handle {
            Some(ref h) => h.clone(),
            None => return false,
        };
        if !io_blocked {
            self.timeout = None;
            return false;
        }
        if progressed {
            if let Some(ref mut t) = self.timeout {
                t.reset(Instant::now() + self.dur);
            }
        }
        if self.timeout.is_none() {
            match Timeout::new(self.dur, &handle) {
                Ok(t) => self.timeout = Some(t),
                Err(e) => {
                    warn!("failed to arm the idle timer: {}", e);
                    return false;
                }
            }
        }
        if let Some(ref mut t) = self.timeout {
            match t.poll() {
                Ok(Async::Ready(())) => return true,
                Ok(Async::NotReady) => {}
                Err(e) => warn!("idle timer failed: {}", e),
            }
        }
        false
    }
}

/// One connection worth of protocol state, driven as a future.
///
/// The future resolves when the connection is done; dropping it closes the
/// socket.
pub struct Proto {
    channel: Rc<RefCell<Channel>>,
    config: Arc<Config>,
    router: Arc<Router>,
    state: State,
    consecutive_errors: u32,
    idle: IdleTimer,
    shared: Option<Arc<ServerShared>>,
    _conn: Option<ConnGuard>,
}

impl Proto {
    /// A protocol handler without an idle timer, pollable outside a
    /// reactor. Mostly useful with mock streams in tests.
    pub fn new<S>(sock: S, config: &Arc<Config>, router: &Arc<Router>)
        -> Proto
        where S: AsyncRead + AsyncWrite + 'static,
    {
        Proto::construct(sock, config, router, None, None, None)
    }

    /// A protocol handler with the idle timer running on `handle`.
    pub fn with_handle<S>(sock: S, config: &Arc<Config>,
        router: &Arc<Router>, handle: &Handle)
        -> Proto
        where S: AsyncRead + AsyncWrite + 'static,
    {
        Proto::construct(sock, config, router, Some(handle.clone()),
            None, None)
    }

    pub(crate) fn bound<S>(sock: S, config: &Arc<Config>,
        router: &Arc<Router>, handle: &Handle, guard: ConnGuard)
        -> Proto
        where S: AsyncRead + AsyncWrite + 'static,
    {
        let shared = guard.shared();
        Proto::construct(sock, config, router, Some(handle.clone()),
            Some(shared), Some(guard))
    }

    fn construct<S>(sock: S, config: &Arc<Config>, router: &Arc<Router>,
        handle: Option<Handle>, shared: Option<Arc<ServerShared>>,
        guard: Option<ConnGuard>)
        -> Proto
        where S: AsyncRead + AsyncWrite + 'static,
    {
        let channel = Channel::new(sock,
            config.discard_rejected_informational);
        Proto {
            channel: Rc::new(RefCell::new(channel)),
            config: config.clone(),
            router: router.clone(),
            state: State::ReadHead(
                HeadParser::request(config.max_request_head_size)),
            consecutive_errors: 0,
            idle: IdleTimer {
                handle,
                timeout: None,
                dur: config.timeout_idle_connection,
            },
            shared,
            _conn: guard,
        }
    }

    fn stopping(&self) -> bool {
        self.shared.as_ref().map_or(false, |s| s.is_stopping())
    }

    /// Begin the next exchange, or close when the server is stopping. The
    /// input buffer keeps whatever already belongs to the next request.
    fn next_exchange(&mut self) {
        if self.stopping() {
            trace!("closing connection: server is stopping");
            self.state = State::Closed;
            return;
        }
        self.channel.borrow_mut().start_exchange(Version::Http11, false);
        self.state = State::ReadHead(
            HeadParser::request(self.config.max_request_head_size));
    }

    /// Map a failure to its response (central error mapper) and finish the
    /// exchange with it, or close when no response applies.
    fn finish_with_error(&mut self, err: Error) {
        match err.status() {
            None => {
                debug!("closing connection: {}", err);
                self.state = State::Closing;
            }
            Some(_) => {
                let resp = base_response(&err);
                self.finish_with_response(resp, err.must_close());
            }
        }
    }

    /// Serialize the final response, updating the consecutive-error
    /// safeguard and the close decision.
    fn finish_with_response(&mut self, resp: Response, forced_close: bool) {
        if resp.is_informational() {
            // interim responses go through the channel writer, never here
            let code = resp.code();
            debug!("handler returned interim status {} as final", code);
            return self.finish_with_error(Error::IllegalInterim(code));
        }
        if resp.is_error() {
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 0;
        }
        let exhausted = resp.is_error()
            && self.consecutive_errors >= self.config.max_error_responses;
        if exhausted {
            debug!("{} consecutive error responses; closing after this one",
                self.consecutive_errors);
        }
        let close = forced_close
            || exhausted
            || self.stopping()
            || resp.must_close()
            || {
                let ch = self.channel.borrow();
                ch.version() < Version::Http11 || ch.is_broken()
                    || ch.peer_closed()
            };
        let outcome = self.channel.borrow_mut().write_response(resp, close);
        match outcome {
            Ok(WriteOutcome::Flushing) => {
                self.state = State::Flush { close };
            }
            Ok(WriteOutcome::Streaming(stream)) => {
                self.state = State::WriteStream { stream, close };
            }
            Err(e) => {
                debug!("failed to serialize response: {}", e);
                if self.channel.borrow().response_started() {
                    // bytes are out already; nothing sensible left to send
                    self.state = State::Closing;
                } else {
                    let fallback = response::internal_server_error();
                    match self.channel.borrow_mut()
                        .write_response(fallback, true)
                    {
                        Ok(..) => self.state = State::Flush { close: true },
                        Err(..) => self.state = State::Closing,
                    }
                }
            }
        }
    }

    /// Head is parsed: check the protocol rules, set up the body, find the
    /// handler, build the request.
    fn dispatch(&mut self, head: RequestHead)
        -> Result<HandlerFuture, Error>
    {
        let RequestHead { method, target, version, headers } = head;
        let version = parse_version_token(&version)?;
        if version < self.config.min_http_version {
            let (major, minor) = match version {
                Version::Http10 => (1, 0),
                Version::Http11 => (1, 1),
            };
            return Err(Error::VersionTooOld(major, minor));
        }
        let is_head = method == "HEAD";
        self.channel.borrow_mut().start_exchange(version, is_head);

        // body framing per RFC 7230 §3.3.3: Transfer-Encoding wins and its
        // last coding must be chunked, otherwise Content-Length, otherwise
        // no body
        let mut chunked = false;
        let te: Vec<&[u8]> = headers.all("Transfer-Encoding").collect();
        if let Some(last) = te.last() {
            if crate::headers::is_chunked(crate::headers::last_coding(last)) {
                chunked = true;
            } else {
                return Err(Error::UnsupportedTransferCoding);
            }
        }
        let cl: Vec<&[u8]> = headers.all("Content-Length").collect();
        if chunked && !cl.is_empty() {
            return Err(Error::BadHeader(
                "Content-Length together with Transfer-Encoding"));
        }
        if cl.len() > 1 {
            return Err(Error::BadHeader("duplicate Content-Length"));
        }
        let declared = match cl.first() {
            Some(value) => {
                let text = ::std::str::from_utf8(
                    crate::headers::trimmed(value)).ok();
                match text.and_then(|t| t.parse::<u64>().ok()) {
                    Some(n) => Some(n),
                    None => return Err(Error::BadHeader(
                        "unparseable Content-Length")),
                }
            }
            None => None,
        };
        if method == "TRACE"
            && (chunked || declared.map_or(false, |n| n > 0))
        {
            return Err(Error::IllegalRequestBody(
                "TRACE request must not carry a body"));
        }
        let expect = version >= Version::Http11
            && headers.all("Expect").any(crate::headers::is_continue);
        let progress = if chunked {
            Some(BodyProgress::Chunked(
                Decoder::new(self.config.max_request_trailers_size)))
        } else {
            match declared {
                Some(n) if n > 0 => Some(BodyProgress::Fixed(n)),
                _ => None,
            }
        };
        self.channel.borrow_mut().set_body(progress, expect);

        let (path_raw, query) = match target.find('?') {
            Some(pos) => (&target[..pos],
                Some(target[pos + 1..].to_string())),
            None => (&target[..], None),
        };
        let matched = self.router.lookup(path_raw)?;

        let ctype = match headers.get_str("Content-Type") {
            Some(s) => Some(MediaType::parse(s)
                .map_err(|_| Error::BadHeader("unparseable Content-Type"))?),
            None => None,
        };
        let mut accept: Vec<MediaRange> = Vec::new();
        for value in headers.all("Accept") {
            let text = ::std::str::from_utf8(value)
                .map_err(|_| Error::BadHeader("unparseable Accept"))?;
            accept.extend(media_type::parse_accept(text)
                .map_err(|_| Error::BadHeader("unparseable Accept"))?);
        }

        let handler = match matched.route.resolve(
            &method, ctype.as_ref(), &accept)
        {
            Ok(handler) => handler,
            Err(Error::MethodNotAllowed(allow)) => {
                if method == "OPTIONS"
                    && self.config.implement_missing_options
                {
                    let mut allow = allow;
                    if !allow.split(", ").any(|m| m == "OPTIONS") {
                        if !allow.is_empty() {
                            allow.push_str(", ");
                        }
                        allow.push_str("OPTIONS");
                    }
                    let resp = response::options_no_content(&allow);
                    return Ok(Box::new(future::ok(resp)));
                }
                return Err(Error::MethodNotAllowed(allow));
            }
            Err(e) => return Err(e),
        };

        if expect && self.config.immediately_continue_expect_100 {
            self.channel.borrow_mut().send_continue()?;
        }

        let request = Request::new(
            method, target, matched.path, query, version, headers,
            matched.params, accept, self.channel.clone(), declared,
            self.config.max_request_body_buffer_size);
        Ok(handler.call(request))
    }

    fn turn(&mut self) -> Poll<(), Error> {
        loop {
            match mem::replace(&mut self.state, State::Closed) {
                State::ReadHead(mut parser) => {
                    loop {
                        let fed = {
                            let mut ch = self.channel.borrow_mut();
                            let buf = ch.in_buf();
                            match parser.feed(&buf[..]) {
                                Ok((consumed, done)) => {
                                    buf.consume(consumed);
                                    Ok(done)
                                }
                                Err(e) => Err(e),
                            }
                        };
                        match fed {
                            Err(e) => {
                                self.finish_with_error(e);
                                break;
                            }
                            Ok(true) => {
                                let head = parser.into_head();
                                trace!("request head: {} {} {}",
                                    head.method, head.target, head.version);
                                match self.dispatch(head) {
                                    Ok(fut) => {
                                        self.state = State::Running(fut);
                                    }
                                    Err(e) => self.finish_with_error(e),
                                }
                                break;
                            }
                            Ok(false) => {
                                let outcome =
                                    self.channel.borrow_mut().read_more()?;
                                match outcome {
                                    ReadOutcome::Data(..) => continue,
                                    ReadOutcome::Blocked => {
                                        self.state = State::ReadHead(parser);
                                        return Ok(Async::NotReady);
                                    }
                                    ReadOutcome::Eof => {
                                        if parser.bytes_consumed() == 0 {
                                            trace!("peer closed between \
                                                exchanges");
                                            return Ok(Async::Ready(()));
                                        }
                                        let err = parser.premature_end();
                                        self.finish_with_error(err);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                State::Running(mut fut) => {
                    match fut.poll() {
                        Ok(Async::Ready(resp)) => {
                            self.finish_with_response(resp, false);
                        }
                        Ok(Async::NotReady) => {
                            // push out interim responses the handler may
                            // have buffered
                            self.channel.borrow_mut().flush()?;
                            self.state = State::Running(fut);
                            return Ok(Async::NotReady);
                        }
                        Err(e) => {
                            // handler-raised failures consult the
                            // application error handler first
                            match self.router.apply_error_handler(&e) {
                                Some(resp) => {
                                    self.finish_with_response(
                                        resp, e.must_close());
                                }
                                None => self.finish_with_error(e),
                            }
                        }
                    }
                }
                State::WriteStream { mut stream, close } => {
                    loop {
                        self.channel.borrow_mut().flush()?;
                        if self.channel.borrow().out_len() > WRITE_WATERMARK {
                            self.state = State::WriteStream { stream, close };
                            return Ok(Async::NotReady);
                        }
                        match stream.poll() {
                            Ok(Async::Ready(Some(chunk))) => {
                                self.channel.borrow_mut()
                                    .write_body_chunk(&chunk);
                            }
                            Ok(Async::Ready(None)) => {
                                self.channel.borrow_mut().finish_stream();
                                self.state = State::Flush { close };
                                break;
                            }
                            Ok(Async::NotReady) => {
                                self.state = State::WriteStream {
                                    stream, close,
                                };
                                return Ok(Async::NotReady);
                            }
                            Err(e) => {
                                debug!("response body stream failed: {}", e);
                                // the head is out; the only honest move is
                                // to close mid-body
                                self.state = State::Closing;
                                break;
                            }
                        }
                    }
                }
                State::Flush { close } => {
                    let drained = self.channel.borrow_mut().flush()?;
                    if !drained {
                        self.state = State::Flush { close };
                        return Ok(Async::NotReady);
                    }
                    if close {
                        trace!("closing connection");
                        return Ok(Async::Ready(()));
                    }
                    let (expect_unanswered, body_pending) = {
                        let ch = self.channel.borrow();
                        (ch.expect_unanswered(), ch.has_body_pending())
                    };
                    if body_pending && expect_unanswered {
                        // the peer is still waiting for a 100 that will
                        // never come, so it will not send the body
                        trace!("closing connection: unanswered expectation");
                        return Ok(Async::Ready(()));
                    }
                    if body_pending {
                        self.state = State::Drain { drained: 0 };
                    } else {
                        self.next_exchange();
                    }
                }
                State::Drain { mut drained } => {
                    loop {
                        let polled = self.channel.borrow_mut().poll_body();
                        match polled {
                            Ok(Async::Ready(Some(chunk))) => {
                                drained += chunk.len() as u64;
                                let cap = self.config
                                    .max_request_body_buffer_size as u64;
                                if drained > cap {
                                    debug!("unconsumed request body larger \
                                        than {} bytes; closing", cap);
                                    return Ok(Async::Ready(()));
                                }
                            }
                            Ok(Async::Ready(None)) => {
                                self.next_exchange();
                                break;
                            }
                            Ok(Async::NotReady) => {
                                self.state = State::Drain { drained };
                                return Ok(Async::NotReady);
                            }
                            Err(e) => {
                                debug!("failed draining request body: {}", e);
                                return Ok(Async::Ready(()));
                            }
                        }
                    }
                }
                State::Closing => {
                    let drained = self.channel.borrow_mut().flush()?;
                    if !drained {
                        self.state = State::Closing;
                        return Ok(Async::NotReady);
                    }
                    return Ok(Async::Ready(()));
                }
                State::Closed => return Ok(Async::Ready(())),
            }
        }
    }
}

impl Future for Proto {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        self.channel.borrow_mut().begin_poll();
        match self.turn() {
            Ok(Async::Ready(())) => Ok(Async::Ready(())),
            Ok(Async::NotReady) => {
                let (io_blocked, progressed) =
                    self.channel.borrow().io_flags();
                if self.idle.check(io_blocked, progressed) {
                    info!("closing connection: idle-connection-timeout");
                    return Ok(Async::Ready(()));
                }
                Ok(Async::NotReady)
            }
            Err(e) => Err(e),
        }
    }
}

/// The base error handler of last resort: a response for every failure
/// kind that maps to a status at all.
fn base_response(err: &Error) -> Response {
    use crate::error::Error::*;
    match *err {
        MethodNotAllowed(ref allow) => response::method_not_allowed(allow),
        NoRouteFound(..) => response::not_found(),
        Size(..) => response::payload_too_large(),
        VersionTooOld(..) => response::upgrade_required(),
        VersionTooNew(..) =>
            response::status(Status::HttpVersionNotSupported),
        UnsupportedTransferCoding => response::status(Status::NotImplemented),
        NotAcceptable => response::status(Status::NotAcceptable),
        UnsupportedMediaType =>
            response::status(Status::UnsupportedMediaType),
        ref other => match other.status() {
            Some(400) => response::bad_request(),
            _ => response::internal_server_error(),
        },
    }
}
