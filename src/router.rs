//! Segment-tree route registry
//!
//! Routes are registered under patterns like `/users/:id/posts/*rest`,
//! where `:name` binds exactly one segment and `*name` binds whatever is
//! left of the path. Lookup prefers static segments, then `:param`, then
//! `*catch_all`, backtracking where needed. The tree is behind an `RwLock`
//! and lookups clone out the matched `Arc<Route>`, so an administrative
//! mutation is never observable in the middle of an exchange.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::{Future, IntoFuture};
use url::percent_encoding::percent_decode;

use crate::error::Error;
use crate::media_type::{MediaType, MediaRange, Score, score, best_score};
use crate::request::Request;
use crate::response::Response;

/// What route handlers return.
pub type HandlerFuture = Box<dyn Future<Item = Response, Error = Error>>;

/// A request handler: a plain function object, no hidden dispatch.
///
/// Closures of the form `Fn(Request) -> Result<Response, Error>` (or
/// anything else that converts into a future) implement this directly.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request) -> HandlerFuture;
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

impl<F, R> Handler for F
    where F: Fn(Request) -> R + Send + Sync + 'static,
          R: IntoFuture<Item = Response, Error = Error>,
          R::Future: 'static,
{
    fn call(&self, req: Request) -> HandlerFuture {
        Box::new((self)(req).into_future())
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum RouteError {
        Collision(pattern: String, reason: &'static str) {
            description("route collision")
            display("route collision at {}: {}", pattern, reason)
        }
        DuplicateParam(pattern: String, name: String) {
            description("duplicate parameter name in pattern")
            display("duplicate parameter name {:?} in {}", name, pattern)
        }
        CatchAllNotLast(pattern: String) {
            description("catch-all segment must terminate the pattern")
            display("catch-all segment must terminate the pattern: {}",
                pattern)
        }
        BadPattern(pattern: String, reason: &'static str) {
            description("bad route pattern")
            display("bad route pattern {}: {}", pattern, reason)
        }
    }
}

/// One segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Static(String),
    Param(String),
    CatchAll(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    if !pattern.starts_with('/') {
        return Err(RouteError::BadPattern(pattern.to_string(),
            "pattern must start with '/'"));
    }
    let mut segments = Vec::new();
    let mut names: Vec<&str> = Vec::new();
    let rest = &pattern[1..];
    if rest.is_empty() {
        return Ok(segments);
    }
    for seg in rest.split('/') {
        if let Some(&Segment::CatchAll(..)) = segments.last() {
            return Err(RouteError::CatchAllNotLast(pattern.to_string()));
        }
        if seg.is_empty() {
            return Err(RouteError::BadPattern(pattern.to_string(),
                "empty segment"));
        }
        if seg.starts_with(':') || seg.starts_with('*') {
            let name = &seg[1..];
            if names.contains(&name) {
                return Err(RouteError::DuplicateParam(
                    pattern.to_string(), name.to_string()));
            }
            names.push(name);
            if seg.starts_with(':') {
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::CatchAll(name.to_string()));
            }
        } else {
            segments.push(Segment::Static(seg.to_string()));
        }
    }
    Ok(segments)
}

#[derive(Debug)]
struct Endpoint {
    method: String,
    consumes: MediaType,
    produces: MediaType,
    handler: Arc<dyn Handler>,
}

/// A registered route: a pattern plus one handler per method and media
/// type combination.
pub struct Route {
    raw: String,
    segments: Vec<Segment>,
    endpoints: Vec<Endpoint>,
}

impl ::std::fmt::Debug for Route {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "Route({:?}, methods=[{}])", self.raw, self.allow())
    }
}

impl Route {
    pub fn builder(pattern: &str) -> Result<RouteBuilder, RouteError> {
        let segments = parse_pattern(pattern)?;
        Ok(RouteBuilder {
            raw: pattern.to_string(),
            segments,
            endpoints: Vec::new(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Distinct methods, in registration order, as an `Allow` value.
    pub fn allow(&self) -> String {
        let mut out = String::new();
        for ep in &self.endpoints {
            if out.split(", ").any(|m| m == ep.method) {
                continue;
            }
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(&ep.method);
        }
        out
    }

    /// Pick the handler for a method, request content type and accepted
    /// ranges. Scores are compared consumed-first, then produced, then the
    /// q-value of the winning range.
    pub(crate) fn resolve(&self, method: &str, ctype: Option<&MediaType>,
        accept: &[MediaRange])
        -> Result<Arc<dyn Handler>, Error>
    {
        let ctype_range = ctype.cloned().map(MediaRange::from_type);
        let mut any_method = false;
        let mut any_consumes = false;
        let mut best: Option<(Score, Score, f32, &Endpoint)> = None;
        for ep in &self.endpoints {
            if ep.method != method {
                continue;
            }
            any_method = true;
            let consumed = match ctype_range {
                Some(ref r) => score(&ep.consumes, r),
                None => Score::Works,
            };
            if consumed == Score::Nope {
                continue;
            }
            any_consumes = true;
            let (produced, q) = best_score(&ep.produces, accept);
            if produced == Score::Nope {
                continue;
            }
            let better = match best {
                None => true,
                Some((c, p, bq, _)) => {
                    (consumed, produced, q) > (c, p, bq)
                }
            };
            if better {
                best = Some((consumed, produced, q, ep));
            }
        }
        if !any_method {
            return Err(Error::MethodNotAllowed(self.allow()));
        }
        match best {
            Some((_, _, _, ep)) => Ok(ep.handler.clone()),
            None if !any_consumes => Err(Error::UnsupportedMediaType),
            None => Err(Error::NotAcceptable),
        }
    }

    /// Two routes are equivalent when their patterns differ at most in
    /// parameter names. Equivalent routes occupy the same tree slot.
    pub fn is_equivalent(&self, other: &Route) -> bool {
        self.segments.len() == other.segments.len() &&
            self.segments.iter().zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (&Segment::Static(ref x), &Segment::Static(ref y)) => {
                        x == y
                    }
                    (&Segment::Param(..), &Segment::Param(..)) => true,
                    (&Segment::CatchAll(..), &Segment::CatchAll(..)) => true,
                    _ => false,
                })
    }
}

/// Builder attaching handlers to a parsed pattern.
#[derive(Debug)]
pub struct RouteBuilder {
    raw: String,
    segments: Vec<Segment>,
    endpoints: Vec<Endpoint>,
}

impl RouteBuilder {
    /// Attach a handler for a method, consuming and producing anything.
    pub fn on<H: Handler>(self, method: &str, handler: H) -> RouteBuilder {
        self.on_media(method, MediaType::new("*", "*"),
            MediaType::new("*", "*"), handler)
    }

    /// Attach a handler with declared consumed and produced media types.
    pub fn on_media<H: Handler>(mut self, method: &str,
        consumes: MediaType, produces: MediaType, handler: H)
        -> RouteBuilder
    {
        self.endpoints.push(Endpoint {
            method: method.to_string(),
            consumes,
            produces,
            handler: Arc::new(handler),
        });
        self
    }

    pub fn build(self) -> Arc<Route> {
        Arc::new(Route {
            raw: self.raw,
            segments: self.segments,
            endpoints: self.endpoints,
        })
    }
}

/// Path parameters bound during lookup, raw and percent-decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    raw: HashMap<String, String>,
    decoded: HashMap<String, String>,
}

impl Params {
    fn insert(&mut self, name: &str, raw: String) {
        let bytes: Vec<u8> = percent_decode(raw.as_bytes()).collect();
        let decoded = String::from_utf8_lossy(&bytes).into_owned();
        self.raw.insert(name.to_string(), raw);
        self.decoded.insert(name.to_string(), decoded);
    }

    /// Percent-decoded value of a parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.decoded.get(name).map(|s| &s[..])
    }

    /// The parameter value exactly as it appeared in the path.
    pub fn raw(&self, name: &str) -> Option<&str> {
        self.raw.get(name).map(|s| &s[..])
    }

    pub fn len(&self) -> usize {
        self.decoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoded.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, &str)> {
        self.decoded.iter().map(|(k, v)| (&k[..], &v[..]))
    }
}

/// A successful lookup: the route, its bound parameters, and the
/// normalized path that was matched.
#[derive(Debug)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: Params,
    pub path: String,
}

/// Collapse `//`, resolve `.` and `..` (never above the root), keep
/// percent-encoding untouched.
pub fn normalize_path(path: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => { segments.pop(); }
            seg => segments.push(seg.to_string()),
        }
    }
    segments
}

fn path_string(segments: &[String]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(seg);
    }
    out
}

struct ParamChild {
    name: String,
    node: Node,
}

struct CatchAllChild {
    name: String,
    route: Arc<Route>,
}

#[derive(Default)]
struct Node {
    statics: HashMap<String, Node>,
    param: Option<Box<ParamChild>>,
    catch_all: Option<CatchAllChild>,
    route: Option<Arc<Route>>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.param.is_none()
            && self.catch_all.is_none() && self.route.is_none()
    }
}

fn insert(node: &mut Node, segments: &[Segment], route: &Arc<Route>)
    -> Result<(), RouteError>
{
    let raw = || route.pattern().to_string();
    match segments.split_first() {
        None => {
            if node.route.is_some() {
                return Err(RouteError::Collision(raw(),
                    "an equivalent route is already registered"));
            }
            node.route = Some(route.clone());
            Ok(())
        }
        Some((&Segment::Static(ref name), rest)) => {
            let child = node.statics.entry(name.clone())
                .or_insert_with(Node::default);
            insert(child, rest, route)
        }
        Some((&Segment::Param(ref name), rest)) => {
            match node.param {
                Some(ref mut child) => {
                    if child.name != *name {
                        return Err(RouteError::Collision(raw(),
                            "parameter name differs from the one \
                             registered at this position"));
                    }
                    insert(&mut child.node, rest, route)
                }
                None => {
                    let mut child = Box::new(ParamChild {
                        name: name.clone(),
                        node: Node::default(),
                    });
                    insert(&mut child.node, rest, route)?;
                    node.param = Some(child);
                    Ok(())
                }
            }
        }
        Some((&Segment::CatchAll(ref name), _rest)) => {
            match node.catch_all {
                Some(ref existing) => {
                    let reason = if existing.name != *name {
                        "catch-all name differs from the one registered \
                         at this position"
                    } else {
                        "an equivalent route is already registered"
                    };
                    Err(RouteError::Collision(raw(), reason))
                }
                None => {
                    node.catch_all = Some(CatchAllChild {
                        name: name.clone(),
                        route: route.clone(),
                    });
                    Ok(())
                }
            }
        }
    }
}

fn find<'x>(node: &'x Node, segments: &[String], bound: &mut Vec<String>)
    -> Option<(&'x Arc<Route>, Option<String>)>
{
    match segments.split_first() {
        None => {
            if let Some(ref route) = node.route {
                return Some((route, None));
            }
            // a catch-all matches zero remaining segments as "/"
            if let Some(ref ca) = node.catch_all {
                return Some((&ca.route, Some("/".to_string())));
            }
            None
        }
        Some((seg, rest)) => {
            if let Some(child) = node.statics.get(seg) {
                if let Some(hit) = find(child, rest, bound) {
                    return Some(hit);
                }
            }
            if let Some(ref child) = node.param {
                bound.push(seg.clone());
                if let Some(hit) = find(&child.node, rest, bound) {
                    return Some(hit);
                }
                bound.pop();
            }
            if let Some(ref ca) = node.catch_all {
                let mut remainder = String::new();
                for seg in segments {
                    remainder.push('/');
                    remainder.push_str(seg);
                }
                return Some((&ca.route, Some(remainder)));
            }
            None
        }
    }
}

fn remove_at(node: &mut Node, segments: &[Segment]) -> Option<Arc<Route>> {
    match segments.split_first() {
        None => node.route.take(),
        Some((&Segment::Static(ref name), rest)) => {
            let removed = node.statics.get_mut(name)
                .and_then(|child| remove_at(child, rest))?;
            if node.statics.get(name).map_or(false, Node::is_empty) {
                node.statics.remove(name);
            }
            Some(removed)
        }
        Some((&Segment::Param(..), rest)) => {
            let removed = node.param.as_mut()
                .and_then(|child| remove_at(&mut child.node, rest))?;
            if node.param.as_ref().map_or(false, |c| c.node.is_empty()) {
                node.param = None;
            }
            Some(removed)
        }
        Some((&Segment::CatchAll(..), _)) => {
            node.catch_all.take().map(|ca| ca.route)
        }
    }
}

type ErrorHandlerFn = dyn Fn(&Error) -> Option<Response> + Send + Sync;

/// The registry connection tasks look routes up in.
pub struct Router {
    root: RwLock<Node>,
    error_handler: RwLock<Option<Arc<ErrorHandlerFn>>>,
}

impl Router {
    pub fn new() -> Router {
        Router {
            root: RwLock::new(Node::default()),
            error_handler: RwLock::new(None),
        }
    }

    /// Register a route. Fails on a collision with an equivalent route or a
    /// conflicting parameter name.
    pub fn add(&self, route: Arc<Route>) -> Result<(), RouteError> {
        let mut root = self.root.write()
            .expect("route tree lock poisoned");
        insert(&mut root, route.segments(), &route)
    }

    /// Look a normalized path up; binds parameters on the way.
    pub fn lookup(&self, path: &str) -> Result<RouteMatch, Error> {
        let segments = normalize_path(path);
        let root = self.root.read()
            .expect("route tree lock poisoned");
        let mut bound = Vec::new();
        let (route, tail) = match find(&root, &segments, &mut bound) {
            Some((route, tail)) => (route.clone(), tail),
            None => return Err(Error::NoRouteFound(path_string(&segments))),
        };
        let mut params = Params::default();
        let mut values = bound.into_iter();
        for seg in route.segments() {
            match *seg {
                Segment::Static(..) => {}
                Segment::Param(ref name) => {
                    if let Some(value) = values.next() {
                        params.insert(name, value);
                    }
                }
                Segment::CatchAll(ref name) => {
                    let tail = tail.clone().unwrap_or_else(|| "/".to_string());
                    params.insert(name, tail);
                }
            }
        }
        Ok(RouteMatch {
            route,
            params,
            path: path_string(&segments),
        })
    }

    /// Remove by pattern; parameter names are ignored. Prunes nodes that
    /// became childless and valueless.
    pub fn remove(&self, pattern: &str)
        -> Result<Option<Arc<Route>>, RouteError>
    {
        let segments = parse_pattern(pattern)?;
        let mut root = self.root.write()
            .expect("route tree lock poisoned");
        Ok(remove_at(&mut root, &segments))
    }

    /// Remove a previously registered route by reference.
    ///
    /// Returns false (and leaves the tree unchanged) when the slot holds a
    /// different, merely equivalent route.
    pub fn remove_route(&self, route: &Arc<Route>) -> bool {
        let mut root = self.root.write()
            .expect("route tree lock poisoned");
        match remove_at(&mut root, route.segments()) {
            Some(ref removed) if Arc::ptr_eq(removed, route) => true,
            Some(removed) => {
                insert(&mut root, removed.segments(), &removed)
                    .expect("reinserting into the emptied slot succeeds");
                false
            }
            None => false,
        }
    }

    /// Install the application error handler consulted for handler-raised
    /// errors before the base mapper.
    pub fn set_error_handler<F>(&self, f: F)
        where F: Fn(&Error) -> Option<Response> + Send + Sync + 'static,
    {
        *self.error_handler.write()
            .expect("error handler lock poisoned") = Some(Arc::new(f));
    }

    pub(crate) fn apply_error_handler(&self, err: &Error)
        -> Option<Response>
    {
        let guard = self.error_handler.read()
            .expect("error handler lock poisoned");
        guard.as_ref().and_then(|f| f(err))
    }
}

impl Default for Router {
    fn default() -> Router {
        Router::new()
    }
}
