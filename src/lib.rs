//! Explicit HTTP/1.x service library based on `tokio` tools
//!
//! Every behavior here is spelled out: requests are parsed by an in-crate
//! byte state machine, bodies are pulled chunk by chunk only when a handler
//! asks for them, and nothing is buffered beyond the configured limits.
#![recursion_limit="100"]

#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate log;
#[macro_use] extern crate lazy_static;

pub mod server;
pub mod router;
pub mod chunked;
pub mod response;
mod enums;
mod headers;
mod error;
mod head_parser;
mod media_type;
mod request;
mod base_serializer;

pub use crate::base_serializer::HeaderError;
pub use crate::enums::{Status, Version};
pub use crate::error::{Error, ParseError, ParseKind, SizeError, SizeKind};
pub use crate::error::{DecodeError, DecodeKind};
pub use crate::headers::Headers;
pub use crate::head_parser::{HeadParser, RequestHead};
pub use crate::media_type::{MediaType, MediaRange, MediaTypeError, Score};
pub use crate::media_type::{score, best_score, parse_accept};
pub use crate::request::{Request, Body, Attributes, ChannelWriter};
pub use crate::request::{Concat, Drain};
pub use crate::response::{Response, ResponseBuilder, ResponseBody};
pub use crate::router::{Router, Route, RouteBuilder, RouteError, RouteMatch};
pub use crate::router::{Handler, HandlerFuture, Params, Segment};
pub use crate::server::{Config, Server, Proto, Stop};
