//! HTTP server protocol implementation
//!
mod config;
mod proto;
pub(crate) mod channel;

pub use self::proto::Proto;

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::{Async, Future, Poll, Stream};
use futures::sync::oneshot;
use futures::task::{self, Task};
use tokio_core::net::TcpListener;
use tokio_core::reactor::Handle;

use crate::enums::Version;
use crate::router::Router;

/// Fine-grained configuration of the HTTP server
#[derive(Debug, Clone)]
pub struct Config {
    max_request_head_size: usize,
    max_request_body_buffer_size: usize,
    max_request_trailers_size: usize,
    max_error_responses: u32,
    min_http_version: Version,
    discard_rejected_informational: bool,
    immediately_continue_expect_100: bool,
    timeout_file_lock: Duration,
    timeout_idle_connection: Duration,
    implement_missing_options: bool,
}

pub(crate) struct ServerShared {
    stopping: AtomicBool,
    connections: AtomicUsize,
    waiting: Mutex<Vec<Task>>,
}

impl ServerShared {
    fn new() -> ServerShared {
        ServerShared {
            stopping: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            waiting: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn connect(self: &Arc<ServerShared>) -> ConnGuard {
        self.connections.fetch_add(1, Ordering::SeqCst);
        ConnGuard(self.clone())
    }

    fn notify_waiters(&self) {
        let mut waiting = self.waiting.lock()
            .expect("server state lock poisoned");
        for task in waiting.drain(..) {
            task.notify();
        }
    }
}

/// Keeps the connection count accurate on every exit path of a connection
/// task.
pub(crate) struct ConnGuard(Arc<ServerShared>);

impl ConnGuard {
    pub(crate) fn shared(&self) -> Arc<ServerShared> {
        self.0.clone()
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if self.0.connections.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.notify_waiters();
        }
    }
}

/// Accepts connections and spawns one `Proto` task per connection.
pub struct Server {
    config: Arc<Config>,
    router: Arc<Router>,
    shared: Arc<ServerShared>,
    acceptors: Mutex<Vec<oneshot::Sender<()>>>,
}

impl Server {
    pub fn new(config: Arc<Config>, router: Arc<Router>) -> Server {
        Server {
            config,
            router,
            shared: Arc::new(ServerShared::new()),
            acceptors: Mutex::new(Vec::new()),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Start serving a listener on the given reactor handle.
    pub fn listen(&self, listener: TcpListener, handle: &Handle) {
        let (tx, rx) = oneshot::channel();
        self.acceptors.lock()
            .expect("acceptor list lock poisoned")
            .push(tx);
        let config = self.config.clone();
        let router = self.router.clone();
        let shared = self.shared.clone();
        let spawn_handle = handle.clone();
        let accept = listener.incoming()
            .for_each(move |(sock, addr)| {
                if shared.is_stopping() {
                    trace!("rejecting connection from {}: server is stopping",
                        addr);
                    return Ok(());
                }
                debug!("new connection from {}", addr);
                let proto = Proto::bound(sock, &config, &router,
                    &spawn_handle, shared.connect());
                spawn_handle.spawn(proto.then(|result| {
                    if let Err(e) = result {
                        debug!("connection terminated: {}", e);
                    }
                    Ok::<(), ()>(())
                }));
                Ok(())
            })
            .map_err(|e| error!("accept error: {}", e));
        handle.spawn(accept
            .select(rx.then(|_| Ok::<(), ()>(())))
            .map(|_| ())
            .map_err(|_| ()));
    }

    /// Stop the server: the acceptors shut down immediately, in-flight
    /// exchanges finish their current request–response, and the returned
    /// future resolves once every connection has closed.
    pub fn stop(&self) -> Stop {
        self.shared.stopping.store(true, Ordering::SeqCst);
        let mut acceptors = self.acceptors.lock()
            .expect("acceptor list lock poisoned");
        for tx in acceptors.drain(..) {
            let _ = tx.send(());
        }
        Stop { shared: self.shared.clone() }
    }
}

/// Future returned by `Server::stop`.
pub struct Stop {
    shared: Arc<ServerShared>,
}

impl Future for Stop {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        if self.shared.connections.load(Ordering::SeqCst) == 0 {
            return Ok(Async::Ready(()));
        }
        self.shared.waiting.lock()
            .expect("server state lock poisoned")
            .push(task::current());
        // re-check: the last connection may have gone away in between
        if self.shared.connections.load(Ordering::SeqCst) == 0 {
            Ok(Async::Ready(()))
        } else {
            Ok(Async::NotReady)
        }
    }
}
