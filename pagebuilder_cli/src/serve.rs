//! A small static file server for the output directory.
//!
//! Requests resolve in this order:
//!
//! 1. an exact file match
//! 2. `index.html` inside a matching directory
//! 3. the path with `.html` appended
//!
//! Anything else is a 404. Paths that try to leave the root are rejected.

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use pagebuilder_core::AnyResult;
use tiny_http::Header;
use tiny_http::Request;
use tiny_http::Response;
use tiny_http::Server;
use tiny_http::StatusCode;

/// Serves the files under `root`.
pub struct DevServer {
	server: Server,
	root: PathBuf,
}

impl DevServer {
	/// Bind to `addr` (`HOST:PORT`).
	pub fn bind(addr: &str, root: impl Into<PathBuf>) -> AnyResult<Self> {
		let server = Server::http(addr).map_err(|e| format!("failed to bind `{addr}`: {e}"))?;
		Ok(Self {
			server,
			root: root.into(),
		})
	}

	/// The bound address, when listening on TCP.
	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.server.server_addr().to_ip()
	}

	/// Handle requests on the current thread. Never returns while the server
	/// is listening.
	pub fn run(&self) {
		for request in self.server.incoming_requests() {
			if let Err(error) = handle_request(request, &self.root) {
				tracing::warn!(%error, "request failed");
			}
		}
	}
}

fn handle_request(request: Request, root: &Path) -> std::io::Result<()> {
	let url = request.url().to_string();
	tracing::debug!(method = %request.method(), url = %url, "request");

	match resolve_request(root, &url) {
		Some(path) => {
			let content = std::fs::read(&path)?;
			let mut response = Response::from_data(content);
			if let Ok(header) = Header::from_bytes("Content-Type", content_type(&path)) {
				response.add_header(header);
			}
			request.respond(response)
		}
		None => {
			let response = Response::new(
				StatusCode(404),
				Header::from_bytes("Content-Type", "text/plain; charset=utf-8")
					.into_iter()
					.collect(),
				Cursor::new("404 Not Found"),
				Some(13),
				None,
			);
			request.respond(response)
		}
	}
}

/// Map a request URL to a file under `root`.
pub fn resolve_request(root: &Path, url: &str) -> Option<PathBuf> {
	let path = url.split(['?', '#']).next().unwrap_or_default();
	let decoded = urlencoding::decode(path).ok()?;
	let relative = Path::new(decoded.trim_matches('/'));

	if relative
		.components()
		.any(|component| !matches!(component, Component::Normal(_)))
	{
		return None;
	}

	let local = root.join(relative);
	if local.is_file() {
		return Some(local);
	}

	if local.is_dir() {
		let index = local.join("index.html");
		return index.is_file().then_some(index);
	}

	let file_name = relative.file_name()?.to_string_lossy();
	let with_html = local.with_file_name(format!("{file_name}.html"));
	with_html.is_file().then_some(with_html)
}

/// Guess the MIME type from the file extension.
pub fn content_type(path: &Path) -> &'static str {
	match path.extension().and_then(|e| e.to_str()) {
		Some("html" | "htm") => "text/html; charset=utf-8",
		Some("css") => "text/css; charset=utf-8",
		Some("js" | "mjs") => "application/javascript; charset=utf-8",
		Some("json") => "application/json; charset=utf-8",
		Some("xml") => "application/xml; charset=utf-8",
		Some("txt") => "text/plain; charset=utf-8",
		Some("svg") => "image/svg+xml",
		Some("png") => "image/png",
		Some("jpg" | "jpeg") => "image/jpeg",
		Some("gif") => "image/gif",
		Some("webp") => "image/webp",
		Some("ico") => "image/x-icon",
		Some("woff") => "font/woff",
		Some("woff2") => "font/woff2",
		Some("pdf") => "application/pdf",
		_ => "application/octet-stream",
	}
}
