//! End-to-end exchanges over a mock stream: one `Proto`, scripted input,
//! asserted output bytes.

use std::sync::Arc;

use futures::{Async, Future};
use futures::executor::{self, Notify, NotifyHandle};
use futures::future;
use matches::assert_matches;
use tk_bufstream::MockData;

use tk_serve::response;
use tk_serve::{Config, Error, Proto, Request, Route, Router, Status};

struct NoopNotify;

impl Notify for NoopNotify {
    fn notify(&self, _id: usize) {}
}

static NOOP: NoopNotify = NoopNotify;

fn poll_once(proto: &mut Proto) -> Result<Async<()>, Error> {
    let notify = NotifyHandle::from(&NOOP);
    let mut spawn = executor::spawn(future::poll_fn(|| proto.poll()));
    spawn.poll_future_notify(&notify, 0)
}

fn echo(req: Request) -> impl Future<Item = response::Response, Error = Error> {
    req.body().concat().map(|bytes| {
        response::text(String::from_utf8_lossy(&bytes).into_owned())
    })
}

fn test_router() -> Arc<Router> {
    let router = Arc::new(Router::new());
    router.add(Route::builder("/").unwrap()
        .on("POST", echo)
        .build()).unwrap();
    router.add(Route::builder("/hello").unwrap()
        .on("GET", |_req: Request| Ok::<_, Error>(response::text("world")))
        .on("HEAD", |_req: Request| Ok::<_, Error>(response::text("world")))
        .build()).unwrap();
    router.add(Route::builder("/users/:id").unwrap()
        .on("GET", |req: Request| {
            let id = req.params().get("id").unwrap_or("").to_string();
            Ok::<_, Error>(response::text(id))
        })
        .build()).unwrap();
    router
}

fn proto_with(mock: &MockData, config: Arc<Config>) -> Proto {
    Proto::new(mock.clone(), &config, &test_router())
}

fn output_of(mock: &MockData) -> String {
    String::from_utf8_lossy(&mock.output(..)).to_string()
}

#[test]
fn request_body_echo() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    mock.add_input("POST / HTTP/1.1\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        Content-Length: 4\r\n\r\nJohn");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "got: {}", out);
    assert!(out.contains("Content-Type: text/plain; charset=utf-8\r\n"));
    assert!(out.contains("Content-Length: 4\r\n"));
    assert!(out.ends_with("\r\n\r\nJohn"));
}

#[test]
fn expect_100_continue_on_first_body_access() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("POST / HTTP/1.1\r\n\
        Content-Type: text/plain;charset=utf-8\r\n\
        Content-Length: 3\r\n\
        Expect: 100-continue\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    // the handler asked for the body, so the interim went out alone
    assert_eq!(output_of(&mock), "HTTP/1.1 100 Continue\r\n\r\n");

    mock.add_input("Hi!");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.starts_with(
        "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"), "got: {}", out);
    assert!(out.contains("Content-Length: 3\r\n"));
    assert!(out.ends_with("\r\n\r\nHi!"));
}

#[test]
fn eager_100_continue() {
    let mock = MockData::new();
    let config = Config::new()
        .immediately_continue_expect_100(true)
        .done();
    // the handler never touches the body, yet the 100 goes out eagerly
    let router = Arc::new(Router::new());
    router.add(Route::builder("/").unwrap()
        .on("POST", |_req: Request| Ok::<_, Error>(response::ok()))
        .build()).unwrap();
    let mut proto = Proto::new(mock.clone(), &config, &router);
    mock.add_input("POST / HTTP/1.1\r\n\
        Content-Length: 3\r\n\
        Expect: 100-continue\r\n\r\nHi!");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK"),
        "got: {}", out);
}

#[test]
fn chunked_request_decoding() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("POST / HTTP/1.1\r\n\
        Transfer-Encoding: chunked\r\n\r\n\
        5\r\nABCDE\r\n0\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.contains("Content-Length: 5\r\n"));
    assert!(out.ends_with("\r\n\r\nABCDE"), "got: {}", out);
}

#[test]
fn chunked_trailers_reach_the_handler() {
    let mock = MockData::new();
    let router = Arc::new(Router::new());
    router.add(Route::builder("/").unwrap()
        .on("POST", |req: Request| {
            let trailers = req.body();
            req.body().concat().map(move |bytes| {
                let weight = trailers.take_trailers()
                    .and_then(|h| h.get_str("Weight").map(str::to_string))
                    .unwrap_or_default();
                response::text(format!("{}/{}",
                    String::from_utf8_lossy(&bytes), weight))
            })
        })
        .build()).unwrap();
    let mut proto = Proto::new(mock.clone(), &Config::new().done(), &router);
    mock.add_input("POST / HTTP/1.1\r\n\
        Transfer-Encoding: chunked\r\n\r\n\
        1\r\nx\r\n0\r\nWeight: 12\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    assert!(output_of(&mock).ends_with("\r\n\r\nx/12"));
}

#[test]
fn route_params_are_percent_decoded() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("GET /users/42%2Fa HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    assert!(output_of(&mock).ends_with("\r\n\r\n42/a"));
}

#[test]
fn persistent_connection_runs_pipelined_requests_in_order() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("GET /hello HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    assert_eq!(out.matches("world").count(), 2);
}

#[test]
fn http10_closes_after_response() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("GET /hello HTTP/1.0\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.0 200 OK\r\n"), "got: {}", out);
    assert!(out.contains("Connection: close\r\n"));
}

#[test]
fn head_response_has_no_body() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("HEAD /hello HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.contains("Content-Length: 5\r\n"));
    assert!(out.ends_with("\r\n\r\n"));
    assert!(!out.contains("world"));
}

#[test]
fn not_found_then_consecutive_error_close() {
    let mock = MockData::new();
    let config = Config::new().max_error_responses(2).done();
    let mut proto = proto_with(&mock, config);
    mock.add_input("GET /missing HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(!out.contains("Connection: close"));

    // the second consecutive error reaches the configured threshold
    mock.add_input("GET /missing HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    let out = output_of(&mock);
    assert_eq!(out.matches("HTTP/1.1 404 Not Found\r\n").count(), 2);
    assert!(out.contains("Connection: close\r\n"));
}

#[test]
fn success_resets_the_error_counter() {
    let mock = MockData::new();
    let config = Config::new().max_error_responses(2).done();
    let mut proto = proto_with(&mock, config);
    mock.add_input("GET /missing HTTP/1.1\r\n\r\n\
        GET /hello HTTP/1.1\r\n\r\n\
        GET /missing HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert_eq!(out.matches("404").count(), 2);
    assert!(!out.contains("Connection: close"));
}

#[test]
fn method_not_allowed_lists_methods() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("POST /hello HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(out.contains("Allow: GET, HEAD\r\n"));
}

#[test]
fn options_fallback_answers_204() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("OPTIONS /hello HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 204 No Content\r\n"), "got: {}", out);
    assert!(out.contains("Allow: GET, HEAD, OPTIONS\r\n"));
}

#[test]
fn options_fallback_can_be_disabled() {
    let mock = MockData::new();
    let config = Config::new().implement_missing_options(false).done();
    let mut proto = proto_with(&mock, config);
    mock.add_input("OPTIONS /hello HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    assert!(output_of(&mock).starts_with("HTTP/1.1 405 "));
}

#[test]
fn http2_version_token_gets_505() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("GET / HTTP/2.0\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"),
        "got: {}", out);
}

#[test]
fn old_http_version_gets_upgrade_required() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("GET / HTTP/0.9\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
    assert!(out.contains("Upgrade: HTTP/1.1\r\n"));
    assert!(out.contains("Connection: upgrade\r\n"));
}

#[test]
fn malformed_request_line_gets_400() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("GET /\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    assert!(output_of(&mock).starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn oversized_head_gets_413_and_close() {
    let mock = MockData::new();
    let config = Config::new().max_request_head_size(32).done();
    let mut proto = proto_with(&mock, config);
    mock.add_input("GET /hello HTTP/1.1\r\n\
        X-Filler: aaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    assert!(out.contains("Connection: close\r\n"));
}

#[test]
fn trace_with_body_is_rejected() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("TRACE / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    assert!(output_of(&mock).starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn content_length_with_transfer_encoding_is_rejected() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("POST / HTTP/1.1\r\n\
        Transfer-Encoding: chunked\r\n\
        Content-Length: 5\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    assert!(output_of(&mock).starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn non_chunked_transfer_coding_gets_501() {
    let mock = MockData::new();
    let mut proto = proto_with(&mock, Config::new().done());
    mock.add_input("POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    assert!(output_of(&mock).starts_with("HTTP/1.1 501 Not Implemented\r\n"));
}

#[test]
fn streamed_response_is_chunk_encoded() {
    let mock = MockData::new();
    let router = Arc::new(Router::new());
    router.add(Route::builder("/stream").unwrap()
        .on("GET", |_req: Request| {
            let chunks = vec![b"hello".to_vec(), b"world!".to_vec()];
            let body = futures::stream::iter_ok::<_, Error>(chunks);
            response::Response::custom(200, "OK")
                .header("Content-Type", &b"text/plain"[..])
                .body_stream(Box::new(body))
                .build()
        })
        .build()).unwrap();
    let mut proto = Proto::new(mock.clone(), &Config::new().done(), &router);
    mock.add_input("GET /stream HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.contains("Transfer-Encoding: chunked\r\n"));
    assert!(out.ends_with(
        "\r\n\r\n00000005\r\nhello\r\n00000006\r\nworld!\r\n0\r\n\r\n"),
        "got: {}", out);
}

#[test]
fn handler_interim_responses_precede_the_final_one() {
    let mock = MockData::new();
    let router = Arc::new(Router::new());
    router.add(Route::builder("/slow").unwrap()
        .on("GET", |req: Request| {
            req.writer().send_interim(&response::status(Status::Processing))?;
            Ok::<_, Error>(response::text("done"))
        })
        .build()).unwrap();
    let mut proto = Proto::new(mock.clone(), &Config::new().done(), &router);
    mock.add_input("GET /slow HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert!(out.starts_with("HTTP/1.1 102 Processing\r\n\r\nHTTP/1.1 200 OK"),
        "got: {}", out);
}

#[test]
fn interim_for_http10_peer_is_discarded() {
    let mock = MockData::new();
    let router = Arc::new(Router::new());
    router.add(Route::builder("/slow").unwrap()
        .on("GET", |req: Request| {
            req.writer().send_interim(&response::status(Status::Processing))?;
            Ok::<_, Error>(response::text("done"))
        })
        .build()).unwrap();
    let mut proto = Proto::new(mock.clone(), &Config::new().done(), &router);
    mock.add_input("GET /slow HTTP/1.0\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::Ready(()));
    let out = output_of(&mock);
    assert!(!out.contains("102"));
    assert!(out.starts_with("HTTP/1.0 200 OK\r\n"));
}

#[test]
fn application_error_handler_intercepts_handler_errors() {
    let mock = MockData::new();
    let router = Arc::new(Router::new());
    router.add(Route::builder("/fail").unwrap()
        .on("GET", |_req: Request| {
            Err::<response::Response, _>(Error::NotAcceptable)
        })
        .build()).unwrap();
    router.set_error_handler(|_err: &Error| {
        Some(response::status(Status::ImATeapot))
    });
    let mut proto = Proto::new(mock.clone(), &Config::new().done(), &router);
    mock.add_input("GET /fail HTTP/1.1\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    assert!(output_of(&mock).starts_with("HTTP/1.1 418 I'm a Teapot\r\n"));
}

#[test]
fn unconsumed_body_is_drained_between_exchanges() {
    let mock = MockData::new();
    let router = Arc::new(Router::new());
    router.add(Route::builder("/ignore").unwrap()
        .on("POST", |_req: Request| Ok::<_, Error>(response::ok()))
        .build()).unwrap();
    let mut proto = Proto::new(mock.clone(), &Config::new().done(), &router);
    mock.add_input("POST /ignore HTTP/1.1\r\nContent-Length: 5\r\n\r\nabcde\
        POST /ignore HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
    assert_matches!(poll_once(&mut proto).unwrap(), Async::NotReady);
    let out = output_of(&mock);
    assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
}

#[test]
fn stopping_server_resolves_immediately_without_connections() {
    use tk_serve::Server;

    let server = Server::new(Config::new().done(), Arc::new(Router::new()));
    let stop = server.stop();
    let notify = NotifyHandle::from(&NOOP);
    let mut spawn = executor::spawn(stop);
    assert_matches!(spawn.poll_future_notify(&notify, 0),
        Ok(Async::Ready(())));
}
