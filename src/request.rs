//! Request values, the lazy body stream, and request attributes
//!
//! A `Request` is handed to exactly one handler. Its body is not read from
//! the socket until somebody polls it, which is also the moment a promised
//! `100 Continue` goes out. Body state lives in the per-connection channel,
//! so consumption is at-most-once no matter how many `Body` handles exist.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use futures::{Async, Future, Poll, Stream};

use crate::enums::Version;
use crate::error::{Error, SizeError, SizeKind};
use crate::headers::Headers;
use crate::media_type::MediaRange;
use crate::response::Response;
use crate::router::Params;
use crate::server::channel::Channel;

/// One HTTP request, owned by one exchange.
pub struct Request {
    method: String,
    target: String,
    path: String,
    query: Option<String>,
    version: Version,
    headers: Headers,
    params: Params,
    accept: Vec<MediaRange>,
    attributes: Attributes,
    channel: Rc<RefCell<Channel>>,
    declared_len: Option<u64>,
    body_limit: usize,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Request({} {} {})", self.method, self.target, self.version)
    }
}

impl Request {
    pub(crate) fn new(
        method: String,
        target: String,
        path: String,
        query: Option<String>,
        version: Version,
        headers: Headers,
        params: Params,
        accept: Vec<MediaRange>,
        channel: Rc<RefCell<Channel>>,
        declared_len: Option<u64>,
        body_limit: usize,
    ) -> Request {
        Request {
            method, target, path, query, version, headers, params, accept,
            attributes: Attributes::new(),
            channel, declared_len, body_limit,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The raw request target, query string included.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The normalized path the route was matched against.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_ref().map(|q| &q[..])
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The parsed `Accept` ranges of this request, in header order.
    pub fn accept(&self) -> &[MediaRange] {
        &self.accept
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// A handle on the request body.
    ///
    /// The body itself can be consumed at most once per exchange; a second
    /// handle observes an already-finished stream.
    pub fn body(&self) -> Body {
        Body {
            channel: self.channel.clone(),
            declared_len: self.declared_len,
            limit: self.body_limit,
        }
    }

    /// The writer for interim (1xx) responses of this exchange.
    pub fn writer(&self) -> ChannelWriter {
        ChannelWriter { channel: self.channel.clone() }
    }
}

/// The lazy request body: a pull-based stream of byte chunks.
///
/// Nothing is read from the socket until `poll` asks for the next chunk,
/// and producers only run far enough to fill that chunk.
pub struct Body {
    channel: Rc<RefCell<Channel>>,
    declared_len: Option<u64>,
    limit: usize,
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Body(len={:?})", self.declared_len)
    }
}

impl Stream for Body {
    type Item = Vec<u8>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Option<Vec<u8>>, Error> {
        self.channel.borrow_mut().poll_body()
    }
}

impl Body {
    /// Declared length, when `Content-Length` was present.
    pub fn len(&self) -> Option<u64> {
        self.declared_len
    }

    /// True once there is nothing (left) to read.
    pub fn is_empty(&self) -> bool {
        self.channel.borrow().body_finished()
    }

    /// Trailer headers of a chunked body, once it was read to the end.
    pub fn take_trailers(&self) -> Option<Headers> {
        self.channel.borrow_mut().take_trailers()
    }

    /// Buffer the whole body, subject to the configured
    /// `max_request_body_buffer_size` (413 when exceeded).
    pub fn concat(self) -> Concat {
        Concat {
            body: self,
            data: Vec::new(),
        }
    }

    /// Read and discard whatever is left, releasing the connection for the
    /// next exchange on all exit paths.
    pub fn drain(self) -> Drain {
        Drain { body: self }
    }
}

/// Future returned by `Body::concat`.
pub struct Concat {
    body: Body,
    data: Vec<u8>,
}

impl Future for Concat {
    type Item = Vec<u8>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Vec<u8>, Error> {
        if self.body.declared_len.map_or(false, |n| n > self.body.limit as u64)
        {
            return Err(SizeError {
                kind: SizeKind::Body,
                configured_max: self.body.limit,
            }.into());
        }
        loop {
            match self.body.poll()? {
                Async::Ready(Some(chunk)) => {
                    if self.data.len() + chunk.len() > self.body.limit {
                        return Err(SizeError {
                            kind: SizeKind::Body,
                            configured_max: self.body.limit,
                        }.into());
                    }
                    self.data.extend_from_slice(&chunk);
                }
                Async::Ready(None) => {
                    let data = ::std::mem::replace(&mut self.data, Vec::new());
                    return Ok(Async::Ready(data));
                }
                Async::NotReady => return Ok(Async::NotReady),
            }
        }
    }
}

/// Future returned by `Body::drain`.
pub struct Drain {
    body: Body,
}

impl Future for Drain {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        loop {
            match self.body.poll()? {
                Async::Ready(Some(..)) => {}
                Async::Ready(None) => return Ok(Async::Ready(())),
                Async::NotReady => return Ok(Async::NotReady),
            }
        }
    }
}

/// Writes interim (1xx) responses ahead of the final response of the same
/// exchange.
#[derive(Clone)]
pub struct ChannelWriter {
    channel: Rc<RefCell<Channel>>,
}

impl fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ChannelWriter")
    }
}

impl ChannelWriter {
    /// Buffer an interim response. For HTTP/1.0 peers it is discarded or
    /// rejected, per `discard_rejected_informational`.
    pub fn send_interim(&self, resp: &Response) -> Result<(), Error> {
        self.channel.borrow_mut().write_interim(resp)
    }
}

type AnyValue = Arc<dyn Any + Send + Sync>;

/// A thread-safe heterogeneous map bound to the request lifetime.
#[derive(Clone, Default)]
pub struct Attributes {
    map: Arc<Mutex<HashMap<String, AnyValue>>>,
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let map = self.map.lock().expect("attributes lock poisoned");
        write!(f, "Attributes({} entries)", map.len())
    }
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes::default()
    }

    /// The value under `name`, if present and of the requested type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let map = self.map.lock().expect("attributes lock poisoned");
        map.get(name).and_then(|v| v.clone().downcast::<T>().ok())
    }

    /// Store a value, returning what it replaced.
    pub fn set<T: Any + Send + Sync>(&self, name: &str, value: T)
        -> Option<AnyValue>
    {
        let mut map = self.map.lock().expect("attributes lock poisoned");
        map.insert(name.to_string(), Arc::new(value))
    }

    /// The value under `name`, created (or replaced, on a type mismatch)
    /// through `create` when absent.
    pub fn get_or_create<T, F>(&self, name: &str, create: F) -> Arc<T>
        where T: Any + Send + Sync, F: FnOnce() -> T,
    {
        let mut map = self.map.lock().expect("attributes lock poisoned");
        if let Some(existing) = map.get(name) {
            if let Ok(v) = existing.clone().downcast::<T>() {
                return v;
            }
        }
        let v = Arc::new(create());
        map.insert(name.to_string(), v.clone());
        v
    }

    /// A snapshot of all entries.
    pub fn as_map(&self) -> Vec<(String, AnyValue)> {
        let map = self.map.lock().expect("attributes lock poisoned");
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod test {
    use super::Attributes;

    #[test]
    fn typed_access() {
        let attrs = Attributes::new();
        assert!(attrs.get::<u32>("count").is_none());
        attrs.set("count", 7u32);
        assert_eq!(*attrs.get::<u32>("count").unwrap(), 7);
        // a type mismatch reads as absent
        assert!(attrs.get::<String>("count").is_none());
    }

    #[test]
    fn get_or_create() {
        let attrs = Attributes::new();
        let v = attrs.get_or_create("greeting", || "hello".to_string());
        assert_eq!(*v, "hello");
        let again = attrs.get_or_create("greeting", || "other".to_string());
        assert_eq!(*again, "hello");
        assert_eq!(attrs.as_map().len(), 1);
    }

    #[test]
    fn replace_returns_previous() {
        let attrs = Attributes::new();
        assert!(attrs.set("k", 1u8).is_none());
        let prev = attrs.set("k", 2u8).unwrap();
        assert_eq!(*prev.downcast::<u8>().unwrap(), 1);
    }
}
