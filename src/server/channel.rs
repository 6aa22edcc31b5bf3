//! Per-connection channel state
//!
//! One `Channel` owns everything a connection task needs between the socket
//! and the exchange machinery: the buffered stream, the body decode
//! progress of the current request, and the response serializer state. The
//! body and the interim-response writer reach it through a shared handle,
//! which is what makes "100 Continue on first body access" possible while
//! the handler runs.

use std::io;

use futures::{Async, Poll, Stream};
use netbuf::Buf;
use tk_bufstream::{IoBuf, ReadBuf, WriteBuf};
use tokio_io::{AsyncRead, AsyncWrite};

use crate::base_serializer::MessageState;
use crate::chunked::Decoder;
use crate::enums::{Version, body_forbidden};
use crate::error::Error;
use crate::headers::Headers;
use crate::response::{Response, ResponseBody};

/// The socket-type-erased face of a buffered stream.
pub(crate) trait SocketIo {
    fn read(&mut self) -> io::Result<usize>;
    fn flush(&mut self) -> io::Result<()>;
    fn done(&self) -> bool;
    fn in_buf(&mut self) -> &mut Buf;
    fn out_buf(&mut self) -> &mut Buf;
    fn out_len(&self) -> usize;
}

struct SplitIo<S> {
    read: ReadBuf<S>,
    write: WriteBuf<S>,
}

impl<S: AsyncRead + AsyncWrite> SocketIo for SplitIo<S> {
    fn read(&mut self) -> io::Result<usize> {
        self.read.read()
    }
    fn flush(&mut self) -> io::Result<()> {
        self.write.flush()
    }
    fn done(&self) -> bool {
        self.read.done()
    }
    fn in_buf(&mut self) -> &mut Buf {
        &mut self.read.in_buf
    }
    fn out_buf(&mut self) -> &mut Buf {
        &mut self.write.out_buf
    }
    fn out_len(&self) -> usize {
        self.write.out_buf.len()
    }
}

/// How far the current request body has been decoded.
pub(crate) enum BodyProgress {
    /// Bytes left of a `Content-Length` body
    Fixed(u64),
    Chunked(Decoder),
}

pub(crate) enum ReadOutcome {
    Data(usize),
    Blocked,
    Eof,
}

pub(crate) enum WriteOutcome {
    /// The whole response is in the output buffer
    Flushing,
    /// Headers are buffered; the body still has to be streamed
    Streaming(Box<dyn Stream<Item = Vec<u8>, Error = Error>>),
}

pub(crate) struct Channel {
    io: Box<dyn SocketIo>,
    msg: MessageState,
    version: Version,
    body: Option<BodyProgress>,
    trailers: Option<Headers>,
    expect_continue: bool,
    continue_sent: bool,
    io_blocked: bool,
    progressed: bool,
    broken: bool,
    discard_informational: bool,
}

impl Channel {
    pub(crate) fn new<S>(sock: S, discard_informational: bool) -> Channel
        where S: AsyncRead + AsyncWrite + 'static,
    {
        let (write, read) = IoBuf::new(sock).split();
        Channel {
            io: Box::new(SplitIo { read, write }),
            msg: MessageState::start(Version::Http11, false, false),
            version: Version::Http11,
            body: None,
            trailers: None,
            expect_continue: false,
            continue_sent: false,
            io_blocked: false,
            progressed: false,
            broken: false,
            discard_informational,
        }
    }

    /// Reset per-exchange state once the head of the next request is known.
    pub(crate) fn start_exchange(&mut self, version: Version, is_head: bool) {
        self.version = version;
        self.msg = MessageState::start(version, is_head, false);
        self.body = None;
        self.trailers = None;
        self.expect_continue = false;
        self.continue_sent = false;
    }

    pub(crate) fn set_body(&mut self, body: Option<BodyProgress>,
        expect_continue: bool)
    {
        self.body = body;
        self.expect_continue = expect_continue;
    }

    pub(crate) fn begin_poll(&mut self) {
        self.io_blocked = false;
        self.progressed = false;
    }

    pub(crate) fn io_flags(&self) -> (bool, bool) {
        (self.io_blocked, self.progressed)
    }

    pub(crate) fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn has_body_pending(&self) -> bool {
        self.body.is_some()
    }

    pub(crate) fn body_finished(&self) -> bool {
        self.body.is_none()
    }

    /// A 100-continue expectation nobody answered yet.
    pub(crate) fn expect_unanswered(&self) -> bool {
        self.expect_continue && !self.continue_sent
    }

    pub(crate) fn take_trailers(&mut self) -> Option<Headers> {
        self.trailers.take()
    }

    pub(crate) fn in_buf(&mut self) -> &mut Buf {
        self.io.in_buf()
    }

    pub(crate) fn out_len(&self) -> usize {
        self.io.out_len()
    }

    pub(crate) fn peer_closed(&self) -> bool {
        self.io.done()
    }

    /// One read from the socket into the input buffer.
    pub(crate) fn read_more(&mut self) -> Result<ReadOutcome, Error> {
        match self.io.read() {
            Ok(0) => {
                if self.io.done() {
                    Ok(ReadOutcome::Eof)
                } else {
                    self.io_blocked = true;
                    Ok(ReadOutcome::Blocked)
                }
            }
            Ok(n) => {
                self.progressed = true;
                Ok(ReadOutcome::Data(n))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.io_blocked = true;
                Ok(ReadOutcome::Blocked)
            }
            Err(e) => {
                self.broken = true;
                Err(e.into())
            }
        }
    }

    /// Push buffered output to the socket. True when the buffer drained.
    pub(crate) fn flush(&mut self) -> Result<bool, Error> {
        let before = self.io.out_len();
        match self.io.flush() {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                self.broken = true;
                return Err(e.into());
            }
        }
        let after = self.io.out_len();
        if after < before {
            self.progressed = true;
        }
        if after > 0 {
            self.io_blocked = true;
        }
        Ok(after == 0)
    }

    /// Write the 100 (Continue) interim response, once per exchange.
    pub(crate) fn send_continue(&mut self) -> Result<(), Error> {
        if self.continue_sent || !self.expect_continue {
            return Ok(());
        }
        self.continue_sent = true;
        self.msg.response_interim(self.io.out_buf(), 100, "Continue",
                &Headers::new())
            .map_err(Error::from)
    }

    /// Write an application-supplied interim response. For an HTTP/1.0 peer
    /// it is either dropped or an error, per configuration.
    pub(crate) fn write_interim(&mut self, resp: &Response)
        -> Result<(), Error>
    {
        if !resp.is_informational() {
            return Err(Error::IllegalInterim(resp.code()));
        }
        if self.version < Version::Http11 {
            if self.discard_informational {
                debug!("discarding interim {} for an HTTP/1.0 peer",
                    resp.code());
                return Ok(());
            }
            return Err(Error::RejectedInterim(resp.code()));
        }
        if resp.code() == 100 {
            if self.continue_sent {
                return Ok(());
            }
            self.continue_sent = true;
        }
        self.msg.response_interim(self.io.out_buf(), resp.code(),
                resp.reason(), resp.headers())
            .map_err(Error::from)
    }

    /// Serialize the final response head plus any fixed body into the
    /// output buffer. Streamed bodies are handed back for the connection
    /// task to drive.
    pub(crate) fn write_response(&mut self, resp: Response, close: bool)
        -> Result<WriteOutcome, Error>
    {
        let Response { code, reason, headers, body, .. } = resp;
        let already_close = crate::headers::is_close(
            headers.get("Connection").unwrap_or(b""));
        self.msg.set_close(close && !already_close);
        self.msg.response_status(self.io.out_buf(), code, &reason);
        #[cfg(feature = "date_header")]
        {
            use std::time::SystemTime;
            use httpdate::HttpDate;
            if !headers.contains("Date") {
                self.msg.format_header(self.io.out_buf(), "Date",
                    HttpDate::from(SystemTime::now()))?;
            }
        }
        for (name, value) in headers.iter() {
            self.msg.add_header(self.io.out_buf(), name, value)?;
        }
        match body {
            ResponseBody::Empty => {
                if !body_forbidden(code) {
                    self.msg.add_length(self.io.out_buf(), 0)?;
                }
                self.msg.done_headers(self.io.out_buf())?;
                self.msg.done(self.io.out_buf());
                Ok(WriteOutcome::Flushing)
            }
            ResponseBody::Bytes(bytes) => {
                self.msg.add_length(self.io.out_buf(), bytes.len() as u64)?;
                let expect_body = self.msg.done_headers(self.io.out_buf())?;
                if expect_body {
                    self.msg.write_body(self.io.out_buf(), &bytes);
                }
                self.msg.done(self.io.out_buf());
                Ok(WriteOutcome::Flushing)
            }
            ResponseBody::Stream(stream) => {
                self.msg.add_chunked(self.io.out_buf())?;
                let expect_body = self.msg.done_headers(self.io.out_buf())?;
                if expect_body {
                    Ok(WriteOutcome::Streaming(stream))
                } else {
                    self.msg.done(self.io.out_buf());
                    Ok(WriteOutcome::Flushing)
                }
            }
        }
    }

    pub(crate) fn write_body_chunk(&mut self, data: &[u8]) {
        self.msg.write_body(self.io.out_buf(), data);
    }

    pub(crate) fn finish_stream(&mut self) {
        self.msg.done(self.io.out_buf());
    }

    pub(crate) fn response_started(&self) -> bool {
        self.msg.is_started()
    }

    /// Pull the next piece of the request body.
    pub(crate) fn poll_body(&mut self) -> Poll<Option<Vec<u8>>, Error> {
        match self.poll_body_inner() {
            Err(e) => {
                self.broken = true;
                Err(e)
            }
            ok => ok,
        }
    }

    fn poll_body_inner(&mut self) -> Poll<Option<Vec<u8>>, Error> {
        if self.body.is_none() {
            return Ok(Async::Ready(None));
        }
        // the promised 100 goes out on the first body access
        if self.expect_continue && !self.continue_sent {
            self.send_continue()?;
            self.flush()?;
        }
        loop {
            enum Step {
                Chunk(Vec<u8>),
                Finished,
                More,
            }
            let step = {
                let body = self.body.as_mut()
                    .expect("body progress present");
                match *body {
                    BodyProgress::Fixed(ref mut remaining) => {
                        if *remaining == 0 {
                            Step::Finished
                        } else {
                            let buf = self.io.in_buf();
                            let avail = ::std::cmp::min(
                                *remaining, buf.len() as u64) as usize;
                            if avail > 0 {
                                let data = buf[..avail].to_vec();
                                buf.consume(avail);
                                *remaining -= avail as u64;
                                Step::Chunk(data)
                            } else {
                                Step::More
                            }
                        }
                    }
                    BodyProgress::Chunked(ref mut decoder) => {
                        decoder.parse(self.io.in_buf())?;
                        let n = decoder.buffered();
                        if n > 0 {
                            let buf = self.io.in_buf();
                            let data = buf[..n].to_vec();
                            buf.consume(n);
                            decoder.consume(n);
                            Step::Chunk(data)
                        } else if decoder.is_done() {
                            Step::Finished
                        } else {
                            Step::More
                        }
                    }
                }
            };
            match step {
                Step::Chunk(data) => return Ok(Async::Ready(Some(data))),
                Step::Finished => {
                    self.finish_body();
                    return Ok(Async::Ready(None));
                }
                Step::More => match self.read_more()? {
                    ReadOutcome::Data(..) => continue,
                    ReadOutcome::Blocked => return Ok(Async::NotReady),
                    ReadOutcome::Eof => {
                        let ended = match *self.body.as_mut()
                            .expect("body progress present")
                        {
                            BodyProgress::Fixed(..) =>
                                Err(Error::ConnectionClosed),
                            BodyProgress::Chunked(ref mut decoder) =>
                                decoder.end_of_upstream(),
                        };
                        ended?;
                        self.finish_body();
                        return Ok(Async::Ready(None));
                    }
                },
            }
        }
    }

    fn finish_body(&mut self) {
        if let Some(BodyProgress::Chunked(ref mut decoder)) = self.body {
            self.trailers = decoder.take_trailers();
        }
        self.body = None;
    }
}
