extern crate env_logger;
extern crate futures;
extern crate tokio_core;
extern crate tk_serve;

use std::env;
use std::sync::Arc;

use futures::empty;
use tokio_core::net::TcpListener;
use tokio_core::reactor::Core;

use tk_serve::response;
use tk_serve::{Config, Error, Request, Route, Router, Server};

fn main() {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init().expect("init logging");

    let mut lp = Core::new().unwrap();

    let router = Arc::new(Router::new());
    router.add(Route::builder("/").unwrap()
        .on("GET", |_req: Request| {
            Ok::<_, Error>(response::text("Hello World!"))
        })
        .build()).unwrap();
    router.add(Route::builder("/greet/:name").unwrap()
        .on("GET", |req: Request| {
            let name = req.params().get("name").unwrap_or("world").to_string();
            Ok::<_, Error>(response::text(format!("Hello, {}!", name)))
        })
        .build()).unwrap();

    let addr = "0.0.0.0:8080".parse().unwrap();
    let listener = TcpListener::bind(&addr, &lp.handle()).unwrap();
    let server = Server::new(Config::new().done(), router);
    server.listen(listener, &lp.handle());

    lp.run(empty::<(), ()>()).unwrap();
}
