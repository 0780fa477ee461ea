//! KPI viewer: a selection control over the catalog and a frame showing the
//! generated page for the current selection.
//!
//! Stateless: every request carries its selection in the query string
//! (`/?kpi=<display name>`) and pages are read from disk on each request.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::catalog::Catalog;
use crate::error::{PipelineError, Result};
use crate::logging::{log, log_request, obj, v_str, Domain, Level};
use crate::naming;
use crate::render::html_escape;

pub const TITLE: &str = "Fermentation KPI Viewer";
pub const PLACEHOLDER: &str = "Select a KPI...";
pub const SELECT_PROMPT: &str = "Please select a KPI from the dropdown.";
pub const QUERY_KEY: &str = "kpi";

/// Request line plus headers; anything past this is not read.
pub const MAX_REQUEST_HEAD: u64 = 16 * 1024;
/// Time a client gets to send its request head.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum ViewOutcome {
    NoSelection,
    Page { name: String, html: String },
    NotFound { name: String, path: PathBuf },
}

impl ViewOutcome {
    pub fn not_found_message(name: &str, path: &Path) -> String {
        format!("Detail page not found for '{}' at {}.", name, path.display())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            body: body.into_bytes(),
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            _ => "Internal Server Error",
        }
    }

    pub fn to_http(&self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        )
        .into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

pub struct Viewer {
    names: Vec<String>,
    pages: HashMap<String, PathBuf>,
    pages_dir: PathBuf,
    assets_dir: PathBuf,
}

impl Viewer {
    pub fn new(catalog: &Catalog, pages_dir: &Path, assets_dir: &Path) -> Self {
        let names: Vec<String> = catalog.display_names().into_iter().map(str::to_string).collect();
        let pages = catalog
            .entries
            .iter()
            .map(|e| (e.name.clone(), pages_dir.join(e.page_file())))
            .collect();
        Self {
            names,
            pages,
            pages_dir: pages_dir.to_path_buf(),
            assets_dir: assets_dir.to_path_buf(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Page file for a display name. Names outside the catalog get the
    /// aggregate-style path so the miss can be reported.
    pub fn page_path(&self, name: &str) -> PathBuf {
        self.pages.get(name).cloned().unwrap_or_else(|| {
            self.pages_dir
                .join(naming::page_file(&naming::bar_forecast_table(name)))
        })
    }

    pub fn resolve(&self, selection: Option<&str>) -> ViewOutcome {
        let name = match selection {
            Some(n) if !n.is_empty() => n,
            _ => return ViewOutcome::NoSelection,
        };
        let path = self.page_path(name);
        match std::fs::read_to_string(&path) {
            Ok(html) => ViewOutcome::Page {
                name: name.to_string(),
                html,
            },
            Err(_) => ViewOutcome::NotFound {
                name: name.to_string(),
                path,
            },
        }
    }

    pub fn render_index(&self, selection: Option<&str>) -> String {
        let outcome = self.resolve(selection);
        let selected = match &outcome {
            ViewOutcome::Page { name, .. } | ViewOutcome::NotFound { name, .. } => {
                Some(name.as_str())
            }
            ViewOutcome::NoSelection => None,
        };

        let mut options = format!(
            "      <option value=\"\" disabled{}>{}</option>\n",
            if selected.is_none() { " selected" } else { "" },
            PLACEHOLDER
        );
        for name in &self.names {
            let esc = html_escape(name);
            let sel = if selected == Some(name.as_str()) { " selected" } else { "" };
            options.push_str(&format!("      <option value=\"{esc}\"{sel}>{esc}</option>\n"));
        }

        let content = match &outcome {
            ViewOutcome::NoSelection => format!("<p>{}</p>", SELECT_PROMPT),
            ViewOutcome::Page { html, .. } => format!(
                "<iframe srcdoc=\"{}\" style=\"width: 100%; height: 600px; border: none;\"></iframe>",
                html_escape(html)
            ),
            ViewOutcome::NotFound { name, path } => {
                format!("<p>{}</p>", html_escape(&ViewOutcome::not_found_message(name, path)))
            }
        };

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <title>{TITLE}</title>
</head>
<body style="padding: 20px; font-family: Arial, sans-serif;">
  <h1>{TITLE}</h1>
  <form method="get" action="/">
    <select id="table-selector" name="{QUERY_KEY}" onchange="this.form.submit()" style="width: 50%; margin-bottom: 20px;">
{options}    </select>
    <noscript><button type="submit">Show</button></noscript>
  </form>
  <div id="output-container">{content}</div>
</body>
</html>
"#
        )
    }

    /// Serve a file under the assets directory. Each decoded path segment
    /// must be a single plain name.
    fn asset<'a>(&self, segments: impl Iterator<Item = &'a str>) -> Response {
        let mut path = self.assets_dir.clone();
        let mut depth = 0;
        for raw in segments {
            let Ok(segment) = percent_decode_str(raw).decode_utf8() else {
                return Response::text(400, "Bad Request");
            };
            let mut components = Path::new(segment.as_ref()).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(name)), None) => path.push(name),
                _ => return Response::text(404, "Not Found"),
            }
            depth += 1;
        }
        if depth == 0 {
            return Response::text(404, "Not Found");
        }
        match std::fs::read(&path) {
            Ok(body) => Response {
                status: 200,
                content_type: content_type_for(&path),
                body,
            },
            Err(_) => Response::text(404, "Not Found"),
        }
    }

    /// Route one request. Only GET is served.
    pub fn handle(&self, method: &str, target: &str) -> Response {
        if method != "GET" {
            return Response::text(405, "Method Not Allowed");
        }
        let url = match Url::parse("http://viewer.local").and_then(|base| base.join(target)) {
            Ok(u) => u,
            Err(_) => return Response::text(400, "Bad Request"),
        };
        match url.path() {
            "/" => {
                let selection = url
                    .query_pairs()
                    .find(|(k, _)| k == QUERY_KEY)
                    .map(|(_, v)| v.into_owned());
                Response::html(200, self.render_index(selection.as_deref()))
            }
            "/health" => Response {
                status: 200,
                content_type: "application/json",
                body: br#"{"status":"ok"}"#.to_vec(),
            },
            _ => {
                let mut segments = url.path_segments().into_iter().flatten();
                if segments.next() == Some("assets") {
                    self.asset(segments)
                } else {
                    Response::text(404, "Not Found")
                }
            }
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Read the request line and drain the headers, stopping at
/// `MAX_REQUEST_HEAD` bytes. `None` when the client sent nothing.
async fn read_request_line<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<Option<String>> {
    let mut lines = BufReader::new(reader.take(MAX_REQUEST_HEAD)).lines();
    let Some(request_line) = lines.next_line().await? else {
        return Ok(None);
    };
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            break;
        }
    }
    Ok(Some(request_line))
}

async fn handle_connection(
    viewer: &Viewer,
    stream: TcpStream,
    timeout: Duration,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let request_line = match tokio::time::timeout(timeout, read_request_line(read_half)).await {
        Ok(head) => head?,
        Err(_) => {
            log_request("-", "-", 408);
            let response = Response::text(408, "Request Timeout");
            write_half.write_all(&response.to_http()).await?;
            return write_half.shutdown().await;
        }
    };
    let Some(request_line) = request_line else {
        return Ok(());
    };
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("/");
    let response = viewer.handle(method, target);
    log_request(method, target, response.status);
    write_half.write_all(&response.to_http()).await?;
    write_half.shutdown().await
}

/// Accept connections until the listener fails. Each connection is one request.
pub async fn serve(viewer: Arc<Viewer>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::io(addr, e))?;
    log(
        Level::Info,
        Domain::Viewer,
        "listening",
        obj(&[
            ("addr", v_str(addr)),
            ("kpis", serde_json::json!(viewer.names().len())),
        ]),
    );
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| PipelineError::io(addr, e))?;
        let viewer = Arc::clone(&viewer);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&viewer, stream, REQUEST_TIMEOUT).await {
                log(
                    Level::Warn,
                    Domain::Viewer,
                    "connection_error",
                    obj(&[("msg", v_str(&err.to_string()))]),
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::KpiEntry;
    use tempfile::TempDir;

    fn viewer(dir: &Path) -> Viewer {
        let catalog = Catalog {
            entries: vec![
                KpiEntry::aggregate("Total GFP (g)", "TotalGFP.jpg"),
                KpiEntry::time_series("pH", "pH.jpg", "pH_PV"),
            ],
        };
        Viewer::new(&catalog, &dir.join("pages"), &dir.join("assets"))
    }

    #[test]
    fn no_selection_prompts() {
        let dir = TempDir::new().unwrap();
        let v = viewer(dir.path());
        assert_eq!(v.resolve(None), ViewOutcome::NoSelection);
        assert_eq!(v.resolve(Some("")), ViewOutcome::NoSelection);
        assert!(v.render_index(None).contains(SELECT_PROMPT));
    }

    #[test]
    fn configured_names_map_to_derived_pages() {
        let dir = TempDir::new().unwrap();
        let v = viewer(dir.path());
        assert_eq!(
            v.page_path("Total GFP (g)"),
            dir.path().join("pages").join("Total_GFP__g__forecast.html")
        );
        assert_eq!(v.page_path("pH"), dir.path().join("pages").join("pH_ts_forecast.html"));
    }

    #[test]
    fn existing_page_is_embedded_in_a_frame() {
        let dir = TempDir::new().unwrap();
        let v = viewer(dir.path());
        std::fs::create_dir_all(dir.path().join("pages")).unwrap();
        std::fs::write(dir.path().join("pages/pH_ts_forecast.html"), "<h1>pH</h1>").unwrap();
        let html = v.render_index(Some("pH"));
        assert!(html.contains("<iframe srcdoc=\"&lt;h1&gt;pH&lt;/h1&gt;\""));
        assert!(html.contains("<option value=\"pH\" selected>pH</option>"));
    }

    #[test]
    fn unconfigured_name_reports_computed_path() {
        let dir = TempDir::new().unwrap();
        let v = viewer(dir.path());
        let expected = dir.path().join("pages").join("Yield__x__forecast.html");
        match v.resolve(Some("Yield (x)")) {
            ViewOutcome::NotFound { path, .. } => assert_eq!(path, expected),
            other => panic!("unexpected {:?}", other),
        }
        let html = v.render_index(Some("Yield (x)"));
        let message = ViewOutcome::not_found_message("Yield (x)", &expected);
        assert!(html.contains(&html_escape(&message)));
    }

    #[test]
    fn routes() {
        let dir = TempDir::new().unwrap();
        let v = viewer(dir.path());
        assert_eq!(v.handle("GET", "/health").status, 200);
        assert_eq!(v.handle("GET", "/nope").status, 404);
        assert_eq!(v.handle("POST", "/").status, 405);

        let res = v.handle("GET", "/?kpi=Total+GFP+%28g%29");
        assert_eq!(res.status, 200);
        let body = String::from_utf8(res.body).unwrap();
        assert!(body.contains("Detail page not found for &#39;Total GFP (g)&#39;"));
    }

    #[test]
    fn assets_are_served_without_traversal() {
        let dir = TempDir::new().unwrap();
        let v = viewer(dir.path());
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        let copy = dir.path().join("assets/specificgrowthrate - Copy.jpg");
        std::fs::write(copy, b"\xff\xd8").unwrap();
        let res = v.handle("GET", "/assets/specificgrowthrate%20-%20Copy.jpg");
        assert_eq!(res.status, 200);
        assert_eq!(res.content_type, "image/jpeg");
        assert_eq!(v.handle("GET", "/assets/..%2Fsecret").status, 404);
    }

    #[test]
    fn encoded_segments_cannot_escape_assets() {
        let dir = TempDir::new().unwrap();
        let v = viewer(dir.path());
        std::fs::create_dir_all(dir.path().join("assets/img")).unwrap();
        std::fs::write(dir.path().join("assets/img/pH.png"), b"png").unwrap();
        std::fs::write(dir.path().join("secret"), b"nope").unwrap();
        assert_eq!(v.handle("GET", "/assets/img/pH.png").body, b"png".to_vec());
        assert_eq!(v.handle("GET", "/assets/img%2FpH.png").status, 404);
        assert_eq!(v.handle("GET", "/assets/%2E%2E/secret").status, 404);
        assert_eq!(v.handle("GET", "/assets/").status, 404);
        assert_eq!(v.handle("GET", "/assets/%ff.jpg").status, 400);
    }

    #[tokio::test]
    async fn request_head_is_capped() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let long = "a".repeat(2 * MAX_REQUEST_HEAD as usize);
        client
            .write_all(format!("GET /{long} HTTP/1.1\r\n").as_bytes())
            .await
            .unwrap();
        drop(client);
        let line = read_request_line(server).await.unwrap().unwrap();
        assert_eq!(line.len() as u64, MAX_REQUEST_HEAD);
    }

    #[tokio::test]
    async fn request_head_stops_at_blank_line() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let line = read_request_line(server).await.unwrap();
        assert_eq!(line.as_deref(), Some("GET /health HTTP/1.1"));
    }

    #[tokio::test]
    async fn silent_client_gets_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dir = TempDir::new().unwrap();
        let v = viewer(dir.path());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(&v, stream, Duration::from_millis(50)).await
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert!(reply.starts_with("HTTP/1.1 408 Request Timeout"));
        server.await.unwrap().unwrap();
    }
}
