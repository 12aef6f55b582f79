//! The trie router (§4.3): static/param/regex/wildcard segments, method
//! maps, a parallel WebSocket slot, and static mount points. Grounded on
//! `original_source/lib/router_impl.cpp` (`insert`/`match_node`/
//! `set_mount_point`/`handle_file_request`), restructured around owned
//! `Box<Node>` children instead of raw pointers.

pub mod mount;
pub mod segment;

use crate::body::file::MimeResolver;
use crate::error::RouteError;
use crate::request::Request;
use crate::response::Response;
use crate::util::url::{split_segments, MultiMap};
use crate::ws::{WsCloseHandler, WsMessageHandler, WsOpenHandler};
use http::header::ALLOW;
use http::{HeaderMap, Method, StatusCode};
use mount::MountTable;
use regex::Regex;
use segment::Segment;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A route handler: borrows the request (path params already bound by the
/// router) and produces a response. The HRTB lets callers avoid moving
/// `Request` through the trait object.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Response> + Send + 'a>>;
pub type Handler = Arc<dyn for<'a> Fn(&'a mut Request) -> HandlerFuture<'a> + Send + Sync>;

/// A path has at most this many segments during matching; guards the
/// recursive descent against a pathological path (SPEC_FULL §4.3 "explicit
/// depth guard so a pathological path cannot blow the stack").
const MAX_SEGMENTS: usize = 1024;

pub struct WsHandlerEntry {
    pub open: WsOpenHandler,
    pub message: WsMessageHandler,
    pub close: WsCloseHandler,
}

struct RegexChild {
    raw: String,
    name: String,
    regex: Regex,
    node: Box<Node>,
}

struct ParamChild {
    raw: String,
    name: String,
    node: Box<Node>,
}

pub struct Node {
    key: String,
    handlers: HashMap<Method, Handler>,
    ws_handler: Option<WsHandlerEntry>,
    static_children: Vec<(String, Box<Node>)>,
    regex_children: Vec<RegexChild>,
    param_children: Vec<ParamChild>,
    wildcard_child: Option<Box<Node>>,
}

impl Node {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            handlers: HashMap::new(),
            ws_handler: None,
            static_children: Vec::new(),
            regex_children: Vec::new(),
            param_children: Vec::new(),
            wildcard_child: None,
        }
    }

    /// Finds or creates the terminal node for `segments[index..]`,
    /// classifying any newly-created child (§4.3 "Insertion follows the
    /// trie by segment key").
    fn insert(&mut self, segments: &[&str], index: usize) -> Result<&mut Node, RouteError> {
        if index == segments.len() {
            return Ok(self);
        }
        let raw = segments[index];

        if let Some(pos) = self.static_children.iter().position(|(k, _)| k == raw) {
            return self.static_children[pos].1.insert(segments, index + 1);
        }
        if let Some(pos) = self.regex_children.iter().position(|c| c.raw == raw) {
            return self.regex_children[pos].node.insert(segments, index + 1);
        }
        if let Some(pos) = self.param_children.iter().position(|c| c.raw == raw) {
            return self.param_children[pos].node.insert(segments, index + 1);
        }
        if self.wildcard_child.is_some() && raw == "*" {
            return self.wildcard_child.as_mut().unwrap().insert(segments, index + 1);
        }

        match segment::classify(raw)? {
            Segment::Static(_) => {
                self.static_children.push((raw.to_string(), Box::new(Node::new(raw))));
                self.static_children.last_mut().unwrap().1.insert(segments, index + 1)
            }
            Segment::Param(name) => {
                self.param_children.push(ParamChild { raw: raw.to_string(), name, node: Box::new(Node::new(raw)) });
                self.param_children.last_mut().unwrap().node.insert(segments, index + 1)
            }
            Segment::Regex { name, regex } => {
                self.regex_children
                    .push(RegexChild { raw: raw.to_string(), name, regex, node: Box::new(Node::new(raw)) });
                self.regex_children.last_mut().unwrap().node.insert(segments, index + 1)
            }
            Segment::Wildcard => {
                self.wildcard_child = Some(Box::new(Node::new(raw)));
                self.wildcard_child.as_mut().unwrap().insert(segments, index + 1)
            }
        }
    }
}

/// Descends the trie trying children in static > regex > param > wildcard
/// priority, backtracking over failed attempts (§4.3 "Match algorithm", §9
/// "Router backtracking"). A terminal node with no handlers and no
/// WebSocket slot is treated as no match so the caller backtracks into
/// sibling branches (§4.3 "treat as no match and continue backtracking").
fn match_node<'a>(node: &'a Node, segments: &[&str], index: usize, params: &MultiMap) -> Option<(&'a Node, MultiMap)> {
    if index == segments.len() {
        if node.handlers.is_empty() && node.ws_handler.is_none() {
            return None;
        }
        return Some((node, params.clone()));
    }
    let seg = segments[index];

    for (key, child) in &node.static_children {
        if key == seg {
            if let Some(found) = match_node(child, segments, index + 1, params) {
                return Some(found);
            }
        }
    }
    for child in &node.regex_children {
        if child.regex.is_match(seg) {
            let mut next = params.clone();
            next.insert(child.name.clone(), seg.to_string());
            if let Some(found) = match_node(&child.node, segments, index + 1, &next) {
                return Some(found);
            }
        }
    }
    for child in &node.param_children {
        let mut next = params.clone();
        next.insert(child.name.clone(), seg.to_string());
        if let Some(found) = match_node(&child.node, segments, index + 1, &next) {
            return Some(found);
        }
    }
    if let Some(child) = &node.wildcard_child {
        for len in 1..=(segments.len() - index) {
            let captured = segments[index..index + len].join("/");
            let mut next = params.clone();
            next.insert("*".to_string(), captured);
            if let Some(found) = match_node(child, segments, index + len, &next) {
                return Some(found);
            }
        }
    }
    None
}

/// The router: trie root, catch-all handler, and static mount table (§3
/// "Router trie", §3 "Mount point").
pub struct Router {
    root: Node,
    not_found_handler: Option<Handler>,
    mounts: MountTable,
}

impl Router {
    pub fn new() -> Self {
        Self { root: Node::new(""), not_found_handler: None, mounts: MountTable::new() }
    }

    pub fn on(&mut self, method: Method, path: &str, handler: Handler) -> Result<(), RouteError> {
        let segments = split_segments(path);
        let node = self.root.insert(&segments, 0)?;
        if node.handlers.contains_key(&method) {
            return Err(RouteError::DuplicateHandler { method, path: path.to_string() });
        }
        node.handlers.insert(method, handler);
        Ok(())
    }

    pub fn on_any(&mut self, methods: &[Method], path: &str, handler: Handler) -> Result<(), RouteError> {
        for method in methods {
            self.on(method.clone(), path, handler.clone())?;
        }
        Ok(())
    }

    pub fn on_not_found(&mut self, handler: Handler) {
        self.not_found_handler = Some(handler);
    }

    pub fn on_ws(
        &mut self,
        path: &str,
        open: WsOpenHandler,
        message: WsMessageHandler,
        close: WsCloseHandler,
    ) -> Result<(), RouteError> {
        let segments = split_segments(path);
        let node = self.root.insert(&segments, 0)?;
        if node.ws_handler.is_some() {
            return Err(RouteError::DuplicateWsHandler(path.to_string()));
        }
        node.ws_handler = Some(WsHandlerEntry { open, message, close });
        Ok(())
    }

    pub fn mount_static(&mut self, prefix: &str, dir: impl Into<std::path::PathBuf>, headers: HeaderMap) -> Result<(), RouteError> {
        self.mounts.insert(prefix, dir, headers)
    }

    pub fn unmount_static(&mut self, prefix: &str) -> bool {
        self.mounts.remove(prefix)
    }

    /// Looks up the WebSocket handler triple for a path, used by the
    /// session's `Upgrade` branch (§4.1 step 3b, §4.3 "WebSocket
    /// registration reuses the same trie").
    pub fn find_ws_handler(&self, decoded_path: &str) -> Option<(&WsHandlerEntry, MultiMap)> {
        let segments = split_segments(decoded_path);
        if segments.len() > MAX_SEGMENTS {
            return None;
        }
        let params = MultiMap::new();
        let (node, bound) = match_node(&self.root, &segments, 0, &params)?;
        node.ws_handler.as_ref().map(|entry| (entry, bound))
    }

    /// Same lookup as [`Router::find_ws_handler`] but clones the (cheap,
    /// `Arc`-backed) handler triple out so callers holding only a transient
    /// read guard (`RouterHandle::ws_handlers_for`) can drop the lock
    /// before running the connection.
    pub fn ws_handlers_for(&self, decoded_path: &str) -> Option<(crate::ws::WsHandlers, MultiMap)> {
        let (entry, bound) = self.find_ws_handler(decoded_path)?;
        Some((
            crate::ws::WsHandlers {
                open: entry.open.clone(),
                message: entry.message.clone(),
                close: entry.close.clone(),
            },
            bound,
        ))
    }

    /// Resolves `(method, decoded_path)` to a handler response, a static
    /// mount-served file, `404`, or `405` (§4.3). Core-generated 4xx bodies
    /// carry the minimal HTML error page (§7 "User-visible failure
    /// behavior"), which needs the configured `Server` header value.
    pub async fn dispatch(&self, req: &mut Request, resolver: &dyn MimeResolver, server_header: &str) -> Response {
        if matches!(req.method, Method::GET | Method::HEAD) {
            if let Some(resp) = self.try_serve_mount(req, resolver).await {
                return resp;
            }
        }

        let segments = split_segments(&req.decoded_path);
        if segments.len() > MAX_SEGMENTS {
            return crate::response::error_response(StatusCode::NOT_FOUND, server_header);
        }
        let params = MultiMap::new();
        if let Some((node, bound)) = match_node(&self.root, &segments, 0, &params) {
            req.path_params = bound;
            if let Some(handler) = node.handlers.get(&req.method).cloned() {
                return handler(req).await;
            }
            let allow = node
                .handlers
                .keys()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            let mut resp = crate::response::error_response(StatusCode::METHOD_NOT_ALLOWED, server_header);
            if let Ok(value) = http::HeaderValue::from_str(&allow) {
                resp.headers.insert(ALLOW, value);
            }
            return resp;
        }

        if let Some(handler) = self.not_found_handler.clone() {
            return handler(req).await;
        }
        crate::response::error_response(StatusCode::NOT_FOUND, server_header)
    }

    async fn try_serve_mount(&self, req: &mut Request, resolver: &dyn MimeResolver) -> Option<Response> {
        let (mount, rest) = self.mounts.find(&req.decoded_path)?;
        if rest.is_empty() && !req.decoded_path.ends_with('/') {
            let mut resp = Response::new();
            resp.set_redirect(&format!("{}/", req.decoded_path), StatusCode::MOVED_PERMANENTLY);
            return Some(resp);
        }

        let mut path = mount.base_dir.join(&rest);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                let mut resolved = None;
                for doc in ["index.html", "index.htm"] {
                    let candidate = path.join(doc);
                    if let Ok(m) = tokio::fs::metadata(&candidate).await {
                        if m.is_file() {
                            resolved = Some(candidate);
                            break;
                        }
                    }
                }
                // Directory listings are out of scope; a directory with no
                // default document is simply not served.
                path = resolved?;
            }
            Ok(meta) if meta.is_file() => {}
            _ => return None,
        }

        let mut resp = Response::new();
        for (name, value) in mount.headers.iter() {
            resp.headers.insert(name.clone(), value.clone());
        }
        resp.set_file_content(&path, &req.headers, resolver).await.ok()?;
        Some(resp)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use std::net::SocketAddr;

    fn make_request(method: Method, path: &str) -> Request {
        Request {
            method,
            target: path.to_string(),
            decoded_path: path.to_string(),
            query_params: MultiMap::new(),
            path_params: MultiMap::new(),
            headers: HeaderMap::new(),
            body: Body::Empty,
            local_addr: "127.0.0.1:8080".parse::<SocketAddr>().unwrap(),
            remote_addr: "127.0.0.1:9000".parse::<SocketAddr>().unwrap(),
            client_ip: "127.0.0.1".to_string(),
            custom_data: None,
        }
    }

    fn ok_handler(body: &'static str) -> Handler {
        Arc::new(move |_req: &mut Request| {
            Box::pin(async move {
                let mut resp = Response::new();
                resp.set_string_content(body, "text/plain", StatusCode::OK);
                resp
            })
        })
    }

    struct StubResolver;
    impl MimeResolver for StubResolver {
        fn resolve(&self, _path: &std::path::Path) -> &str {
            "application/octet-stream"
        }
    }

    #[tokio::test]
    async fn matches_param_segment() {
        let mut router = Router::new();
        router
            .on(Method::GET, "/user/:id", Arc::new(|req: &mut Request| {
                Box::pin(async move {
                    let id = req.path_param("id").unwrap_or("").to_string();
                    let mut resp = Response::new();
                    resp.set_string_content(id, "text/plain", StatusCode::OK);
                    resp
                })
            }))
            .unwrap();

        let mut req = make_request(Method::GET, "/user/42");
        let resp = router.dispatch(&mut req, &StubResolver, "embedhttp").await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(req.path_param("id"), Some("42"));
    }

    #[tokio::test]
    async fn unregistered_method_is_405_with_allow() {
        let mut router = Router::new();
        router.on(Method::POST, "/x", ok_handler("posted")).unwrap();

        let mut req = make_request(Method::GET, "/x");
        let resp = router.dispatch(&mut req, &StubResolver, "embedhttp").await;
        assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers.get(ALLOW).unwrap(), "POST");
    }

    #[tokio::test]
    async fn unmatched_path_is_404() {
        let router = Router::new();
        let mut req = make_request(Method::GET, "/nope");
        let resp = router.dispatch(&mut req, &StubResolver, "embedhttp").await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
    }

    fn buffered_string(resp: &Response) -> String {
        match &resp.payload {
            crate::response::ResponsePayload::Buffered(Body::String(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            crate::response::ResponsePayload::Buffered(other) => panic!("expected a string body, got {other:?}"),
            crate::response::ResponsePayload::Stream(_) => panic!("expected a buffered body, got a stream"),
        }
    }

    #[tokio::test]
    async fn core_generated_404_carries_html_error_page() {
        let router = Router::new();
        let mut req = make_request(Method::GET, "/nope");
        let resp = router.dispatch(&mut req, &StubResolver, "embedhttp/1.0").await;
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert!(resp.keep_alive);
        let text = buffered_string(&resp);
        assert!(text.contains("404"));
        assert!(text.contains("Not Found"));
        assert!(text.contains("embedhttp/1.0"));
    }

    #[tokio::test]
    async fn core_generated_405_carries_html_error_page() {
        let mut router = Router::new();
        router.on(Method::POST, "/x", ok_handler("posted")).unwrap();
        let mut req = make_request(Method::GET, "/x");
        let resp = router.dispatch(&mut req, &StubResolver, "embedhttp/1.0").await;
        assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(resp.keep_alive);
        let text = buffered_string(&resp);
        assert!(text.contains("405"));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut router = Router::new();
        router.on(Method::GET, "/a", ok_handler("1")).unwrap();
        assert!(router.on(Method::GET, "/a", ok_handler("2")).is_err());
    }

    #[test]
    fn static_beats_param_beats_wildcard() {
        let mut router = Router::new();
        router.on(Method::GET, "/a/b", ok_handler("static")).unwrap();
        router.on(Method::GET, "/a/:x", ok_handler("param")).unwrap();
        router.on(Method::GET, "/a/*", ok_handler("wildcard")).unwrap();

        let segments = split_segments("/a/b");
        let params = MultiMap::new();
        let (node, _) = match_node(&router.root, &segments, 0, &params).unwrap();
        assert!(node.handlers.contains_key(&Method::GET));
        // the static child is the one registered at "/a/b", not "/a/:x"
        assert_eq!(node.key, "b");
    }
}
