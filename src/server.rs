//! Local HTTP server the browser is pointed at.
//!
//! The browser routes every `*.test` request through this server (it acts
//! as the HTTP proxy), so a single listener serves all test hosts. Each page
//! reflects the request headers it received, shows `document.referrer`,
//! embeds a same-origin iframe that reads the parent's referrer, and links
//! to `/page/` on every configured host.

use crate::page::{FRAME_ID, FRAME_REFERRER_ID, FRAME_REFLECT_ID, REFERRER_ID};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tiny_http::{Header, Request, Response, Server};
use url::Url;

const SHOW_REFERRER_JS: &str = include_str!("../static/show-referrer.js");
const FRAME_REFERRER_JS: &str = include_str!("../static/frame-referrer.js");

/// A response produced by [`route`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    fn html(body: String) -> Self {
        Self { status: 200, content_type: "text/html; charset=utf-8", body }
    }

    fn script(body: &str) -> Self {
        Self { status: 200, content_type: "text/javascript; charset=utf-8", body: body.to_string() }
    }

    fn not_found() -> Self {
        Self { status: 404, content_type: "text/plain; charset=utf-8", body: "404 page not found\n".into() }
    }
}

/// What the router needs to know about a request
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub host: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl PageRequest {
    /// Split a request target into host and path. Proxied requests carry an
    /// absolute URI, direct ones only a path plus the `Host` header.
    pub fn from_parts(target: &str, host_header: Option<&str>, headers: Vec<(String, String)>) -> Self {
        let (host, path) = match Url::parse(target) {
            Ok(url) if url.has_host() => {
                let host = match url.port() {
                    Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
                    None => url.host_str().unwrap_or_default().to_string(),
                };
                (host, url.path().to_string())
            }
            _ => {
                let path = target.split('?').next().unwrap_or("/");
                (host_header.unwrap_or_default().to_string(), path.to_string())
            }
        };
        Self { host, path, headers }
    }
}

/// Reduce link targets to their origins, skipping empty entries.
pub fn normalize_links<S: AsRef<str>>(links: &[S]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(links.len());
    for raw in links.iter().map(|s| s.as_ref().trim()) {
        if raw.is_empty() {
            continue;
        }
        let url = Url::parse(raw).map_err(|e| Error::ConfigError(format!("invalid link '{}': {}", raw, e)))?;
        if !url.has_host() {
            return Err(Error::ConfigError(format!("link '{}' has no host", raw)));
        }
        out.push(url.origin().ascii_serialization());
    }
    Ok(out)
}

/// Split a comma separated `--links` value
pub fn parse_link_list(list: &str) -> Result<Vec<String>> {
    normalize_links(&list.split(',').collect::<Vec<_>>())
}

/// Produce the response for a request
pub fn route(req: &PageRequest, links: &[String]) -> Reply {
    match req.path.as_str() {
        "/favicon.ico" => Reply::not_found(),
        "/static/show-referrer.js" => Reply::script(SHOW_REFERRER_JS),
        "/static/frame-referrer.js" => Reply::script(FRAME_REFERRER_JS),
        p if p.starts_with("/static/") => Reply::not_found(),
        "/frame/" => Reply::html(render_frame()),
        _ => Reply::html(render_page(req, links)),
    }
}

fn render_page(req: &PageRequest, links: &[String]) -> String {
    let mut headers = req.headers.clone();
    headers.sort_by(|a, b| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()));

    let mut rows = String::new();
    for (name, value) in &headers {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            escape_html(name),
            escape_html(value)
        ));
    }

    let mut anchors = String::new();
    for link in links {
        let href = format!("{}/page/", link);
        anchors.push_str(&format!(
            "<li><a href=\"{}\">Page</a> on {}</li>\n",
            escape_html(&href),
            escape_html(link)
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Referer test page: {host}</title>
</head>
<body>
<h1>{host}{path}</h1>
<h2>Request headers</h2>
<table id="headers">
<tr><th>Header</th><th>Value</th></tr>
{rows}</table>
<h2>JavaScript</h2>
<p>document.referrer: <span id="{referrer_id}"></span></p>
<iframe id="{frame_id}" src="/frame/"></iframe>
<h2>Links</h2>
<ul id="links">
{anchors}</ul>
<script src="/static/show-referrer.js"></script>
</body>
</html>
"#,
        host = escape_html(&req.host),
        path = escape_html(&req.path),
        rows = rows,
        referrer_id = REFERRER_ID,
        frame_id = FRAME_ID,
        anchors = anchors,
    )
}

fn render_frame() -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Referer test frame</title></head>
<body>
<p>parent document.referrer: <span id="{frame_referrer}"></span></p>
<p>reflected parent referrer: <span id="{frame_reflect}"></span></p>
<script src="/static/frame-referrer.js"></script>
</body>
</html>
"#,
        frame_referrer = FRAME_REFERRER_ID,
        frame_reflect = FRAME_REFLECT_ID,
    )
}

/// Header name in canonical MIME form (`referer` -> `Referer`,
/// `x-forwarded-for` -> `X-Forwarded-For`). The header table always shows
/// this form, whatever casing the client sent.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str().to_ascii_lowercase().as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Minimal HTML escaping for text and attribute values
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Background test server. Stops and joins its thread on drop.
pub struct TestServer {
    server: Arc<Server>,
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Listen on `127.0.0.1:port` (`0` picks a free port)
    pub fn start<S: AsRef<str>>(port: u16, links: &[S]) -> Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)), links)
    }

    /// Listen on an explicit address
    pub fn bind<S: AsRef<str>>(addr: SocketAddr, links: &[S]) -> Result<Self> {
        let links = normalize_links(links)?;
        let server = Server::http(addr)
            .map_err(|e| Error::ServerError(format!("Failed to bind {}: {}", addr, e)))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| Error::ServerError("server is not listening on an IP socket".into()))?;
        let server = Arc::new(server);

        let worker = server.clone();
        let handle = thread::Builder::new()
            .name(format!("test-server-{}", addr.port()))
            .spawn(move || {
                for request in worker.incoming_requests() {
                    handle_request(request, &links);
                }
                debug!("test server loop finished");
            })
            .map_err(|e| Error::ServerError(format!("Failed to spawn server thread: {}", e)))?;

        info!("Test server listening on http://{}", addr);
        Ok(Self { server, addr, handle: Some(handle) })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Direct URL for `path` on this server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Block until the server thread exits
    pub fn wait(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_request(request: Request, links: &[String]) {
    let headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .map(|h| (canonical_header_name(h.field.as_str().as_str()), h.value.as_str().to_string()))
        .collect();
    let host_header = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.clone());
    let req = PageRequest::from_parts(request.url(), host_header.as_deref(), headers);

    let remote = request
        .remote_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|| "-".to_string());
    info!("{} {} {}{}", remote, request.method(), req.host, req.path);

    let reply = route(&req, links);
    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        warn!("Failed to send response: {}", e);
    }
}
