// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use crate::{collector, config, metric, process, webconfig};
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::{
    Request, Response, StatusCode,
    body::{Bytes, Incoming},
    header::{self, HeaderName, HeaderValue},
};
use log::{debug, error, info};
use std::{
    future, net, pin,
    sync::{
        self,
        atomic::{AtomicU64, Ordering},
    },
};

type Body = Full<Bytes>;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

// status codes the scrape handler can answer with
const HANDLER_CODES: [u16; 4] = [200, 400, 500, 503];

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn landing_page(metrics_path: &str) -> String {
    format!(
        "<html>\n\
         <head><title>Node Exporter</title></head>\n\
         <body>\n\
         <h1>Node Exporter</h1>\n\
         <p>Version {}</p>\n\
         <p><a href=\"{}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        env!("CARGO_PKG_VERSION"),
        html_escape(metrics_path)
    )
}

/// A landing path ending in `/` also covers every path below it.
fn is_landing_path(exporter_path: &str, path: &str) -> bool {
    path == exporter_path || (exporter_path.ends_with('/') && path.starts_with(exporter_path))
}

/// Listen addresses for `port`: dual-stack IPv6 first, then IPv4 for
/// hosts without IPv6.
pub fn listen_addrs(port: u16) -> [net::SocketAddr; 2] {
    [
        net::SocketAddr::from((net::Ipv6Addr::UNSPECIFIED, port)),
        net::SocketAddr::from((net::Ipv4Addr::UNSPECIFIED, port)),
    ]
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Body> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

/// promhttp_metric_handler_* metrics about the scrape handler itself.
struct HandlerMetrics {
    requests: [AtomicU64; HANDLER_CODES.len()],
    requests_info: metric::Info<1>,
    in_flight_info: metric::Info<0>,
}

impl HandlerMetrics {
    fn new() -> Self {
        HandlerMetrics {
            requests: Default::default(),
            requests_info: metric::Info {
                subsys: "metric_handler",
                name: "requests",
                help: "Total number of scrapes by HTTP status code.",
                unit: metric::Unit::None,
                ty: metric::Type::Counter,
                label_keys: ["code"],
            },
            in_flight_info: metric::Info {
                subsys: "metric_handler",
                name: "requests_in_flight",
                help: "Current number of scrapes being served.",
                unit: metric::Unit::None,
                ty: metric::Type::Gauge,
                label_keys: [],
            },
        }
    }

    fn count(&self, status: StatusCode) {
        if let Some(idx) = HANDLER_CODES
            .iter()
            .position(|&code| code == status.as_u16())
        {
            self.requests[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn write(&self, buf: &mut String, in_flight: usize) {
        let mut enc = metric::Encoder::new(buf, "promhttp");
        enc.write(&self.in_flight_info, in_flight);

        let mut menc = enc.with_info(&self.requests_info);
        for (code, count) in HANDLER_CODES.iter().zip(&self.requests) {
            menc.write(&[code.to_string().as_str()], count.load(Ordering::Relaxed));
        }
    }
}

struct Shared {
    collector: collector::NodeCollector,
    process: Option<process::Process>,
    handler: HandlerMetrics,

    metrics_path: String,
    exporter_path: String,
    landing_page: Bytes,
    headers: Vec<(HeaderName, HeaderValue)>,
    auth: Option<webconfig::BasicAuth>,

    max_requests: usize,
    limiter: sync::Arc<tokio::sync::Semaphore>,
}

impl Shared {
    fn gather(&self, names: &[&str]) -> String {
        let mut buf = String::new();
        self.collector.collect(names, &mut buf);

        if let Some(process) = &self.process {
            process.collect(&mut buf);

            let in_flight = self.max_requests - self.limiter.available_permits();
            self.handler.write(&mut buf, in_flight);
        }

        buf
    }
}

async fn authorize(shared: &sync::Arc<Shared>, header: Option<String>) -> bool {
    if shared.auth.is_none() {
        return true;
    }

    // bcrypt is too slow for the runtime threads
    let task_shared = shared.clone();
    let res = tokio::task::spawn_blocking(move || {
        task_shared
            .auth
            .as_ref()
            .is_some_and(|auth| auth.check(header.as_deref()))
    })
    .await;

    res.unwrap_or_else(|err| {
        error!("basic auth check failed: {err:?}");
        false
    })
}

async fn scrape(shared: sync::Arc<Shared>, query: Option<String>) -> Response<Body> {
    let names = match shared.collector.filter(query.as_deref()) {
        Ok(names) => names,
        Err(err) => {
            debug!("bad scrape query: {err}");
            return response(StatusCode::BAD_REQUEST, TEXT_CONTENT_TYPE, format!("{err}\n"));
        }
    };

    let Ok(_permit) = shared.limiter.clone().try_acquire_owned() else {
        let body = format!(
            "Limit of concurrent requests reached ({}), try again later.\n",
            shared.max_requests
        );
        return response(StatusCode::SERVICE_UNAVAILABLE, TEXT_CONTENT_TYPE, body);
    };

    let task_shared = shared.clone();
    match tokio::task::spawn_blocking(move || task_shared.gather(&names)).await {
        Ok(buf) => response(StatusCode::OK, metric::CONTENT_TYPE, buf),
        Err(err) => {
            error!("scrape failed: {err:?}");
            response(
                StatusCode::INTERNAL_SERVER_ERROR,
                TEXT_CONTENT_TYPE,
                "An error has occurred while serving metrics.\n",
            )
        }
    }
}

async fn handle(shared: sync::Arc<Shared>, req: Request<Incoming>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|val| val.to_str().ok())
        .map(str::to_string);
    drop(req);

    let mut resp = if !authorize(&shared, auth_header).await {
        let mut resp = response(StatusCode::UNAUTHORIZED, TEXT_CONTENT_TYPE, "Unauthorized\n");
        resp.headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic"));
        resp
    } else if path == shared.metrics_path {
        let resp = scrape(shared.clone(), query).await;
        shared.handler.count(resp.status());
        resp
    } else if is_landing_path(&shared.exporter_path, &path) {
        response(
            StatusCode::OK,
            HTML_CONTENT_TYPE,
            shared.landing_page.clone(),
        )
    } else {
        debug!("incorrect path {path}");
        response(StatusCode::NOT_FOUND, TEXT_CONTENT_TYPE, "404 page not found\n")
    };

    for (name, val) in &shared.headers {
        resp.headers_mut().insert(name.clone(), val.clone());
    }

    resp
}

#[derive(Clone)]
struct Svc {
    shared: sync::Arc<Shared>,
}

impl hyper::service::Service<Request<Incoming>> for Svc {
    type Response = Response<Body>;
    type Error = hyper::Error;
    type Future =
        pin::Pin<Box<dyn future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let shared = self.shared.clone();
        Box::pin(async move { Ok(handle(shared, req).await) })
    }
}

async fn serve_connection<S>(stream: S, svc: Svc)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let io = hyper_util::rt::TokioIo::new(stream);

    let http = hyper::server::conn::http1::Builder::new();
    let conn = http.serve_connection(io, svc);

    if let Err(err) = conn.await {
        debug!("server connection error: {err:?}");
    }
}

/// A bound metrics server.
pub struct Server {
    listener: tokio::net::TcpListener,
    acceptor: Option<tokio_rustls::TlsAcceptor>,
    shared: sync::Arc<Shared>,
}

impl Server {
    /// Binds the first of `addrs` that works.
    pub async fn bind(
        addrs: &[net::SocketAddr],
        config: &config::Config,
        web_config: &webconfig::WebConfig,
        collector: collector::NodeCollector,
    ) -> Result<Self> {
        let acceptor = web_config.tls_acceptor()?;

        let process = if config.disable_exporter_metrics {
            None
        } else {
            let paths = collector::Paths::new(&config.procfs_path, &config.sysfs_path);
            Some(process::Process::new(sync::Arc::new(paths)))
        };

        let max_requests = usize::try_from(config.max_requests)
            .unwrap_or(1)
            .max(1);

        let shared = Shared {
            collector,
            process,
            handler: HandlerMetrics::new(),
            metrics_path: config.metrics_path.clone(),
            exporter_path: config.exporter_path.clone(),
            landing_page: Bytes::from(landing_page(&config.metrics_path)),
            headers: web_config.headers()?,
            auth: web_config.basic_auth(),
            max_requests,
            limiter: sync::Arc::new(tokio::sync::Semaphore::new(max_requests)),
        };

        let listener = tokio::net::TcpListener::bind(addrs)
            .await
            .with_context(|| format!("failed to bind to {addrs:?}"))?;

        Ok(Server {
            listener,
            acceptor,
            shared: sync::Arc::new(shared),
        })
    }

    pub fn local_addr(&self) -> Result<net::SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to get listener address")
    }

    /// Accepts connections until the process exits.
    pub async fn serve(self) -> Result<()> {
        info!(
            "listening on {:?} (tls={})",
            self.local_addr()?,
            self.acceptor.is_some()
        );

        let svc = Svc {
            shared: self.shared.clone(),
        };

        loop {
            let (stream, client_addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    error!("failed to accept connection: {err:?}");
                    continue;
                }
            };
            debug!("new connection from {client_addr:?}");

            let svc = svc.clone();
            let acceptor = self.acceptor.clone();
            tokio::task::spawn(async move {
                match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => serve_connection(stream, svc).await,
                        Err(err) => debug!("TLS handshake with {client_addr:?} failed: {err:?}"),
                    },
                    None => serve_connection(stream, svc).await,
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testutil::write_file;
    use base64::Engine;
    use std::fs;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Fixture {
        _dir: tempfile::TempDir,
        server: Server,
    }

    async fn fixture(web_yaml: Option<&str>, f: impl FnOnce(&mut config::Config)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "proc/loadavg", "0.25 0.50 1.00 2/345 6789\n");

        let mut config = config::Config {
            disable_default_collectors: true,
            enable_collectors: vec!["loadavg".into(), "time".into()],
            procfs_path: dir.path().join("proc"),
            sysfs_path: dir.path().join("sys"),
            ..Default::default()
        };
        f(&mut config);
        config.apply_defaults();

        let web_config = match web_yaml {
            Some(yaml) => {
                crate::webconfig::testutil::write_tls_files(dir.path());
                let path = dir.path().join("web.yml");
                fs::write(&path, yaml).unwrap();
                webconfig::WebConfig::load(path.to_str().unwrap()).unwrap()
            }
            None => webconfig::WebConfig::default(),
        };

        let collector = collector::NodeCollector::new(&config).unwrap();
        let addr = net::SocketAddr::from(([127, 0, 0, 1], 0));
        let server = Server::bind(&[addr], &config, &web_config, collector)
            .await
            .unwrap();

        Fixture { _dir: dir, server }
    }

    fn spawn(server: Server) -> net::SocketAddr {
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());
        addr
    }

    async fn get(addr: net::SocketAddr, target: &str, extra_headers: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let req = format!(
            "GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n{extra_headers}\r\n"
        );
        stream.write_all(req.as_bytes()).await.unwrap();

        let mut resp = String::new();
        stream.read_to_string(&mut resp).await.unwrap();
        resp
    }

    fn basic(user: &str, pass: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        format!("Authorization: Basic {encoded}\r\n")
    }

    #[test]
    fn escape_landing_page_link() {
        let page = landing_page("/m?a=1&b=\"<x>\"");
        assert!(page.contains("<title>Node Exporter</title>"));
        assert!(page.contains("href=\"/m?a=1&amp;b=&quot;&lt;x&gt;&quot;\""));
    }

    #[tokio::test]
    async fn landing_page_and_not_found() {
        let fixture = fixture(None, |_| ()).await;
        let addr = spawn(fixture.server);

        let resp = get(addr, "/", "").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("content-type: text/html; charset=utf-8\r\n"));
        assert!(resp.contains("<a href=\"/metrics\">Metrics</a>"));

        // "/" covers the whole tree
        let resp = get(addr, "/favicon.ico", "").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("<title>Node Exporter</title>"));
    }

    #[tokio::test]
    async fn custom_paths() {
        let fixture = fixture(None, |config| {
            config.metrics_path = "/stats".into();
            config.exporter_path = "/home".into();
        })
        .await;
        let addr = spawn(fixture.server);

        assert!(get(addr, "/stats", "").await.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(get(addr, "/home", "").await.contains("href=\"/stats\""));
        assert!(get(addr, "/metrics", "").await.starts_with("HTTP/1.1 404"));
        assert!(get(addr, "/", "").await.starts_with("HTTP/1.1 404"));
        assert!(get(addr, "/home/x", "").await.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn landing_subtree() {
        let fixture = fixture(None, |config| config.exporter_path = "/ui/".into()).await;
        let addr = spawn(fixture.server);

        assert!(get(addr, "/ui/", "").await.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(get(addr, "/ui/a/b", "").await.contains("href=\"/metrics\""));
        assert!(get(addr, "/ui", "").await.starts_with("HTTP/1.1 404"));
        assert!(get(addr, "/other", "").await.starts_with("HTTP/1.1 404"));
        assert!(get(addr, "/metrics", "").await.contains("node_load1 0.25\n"));
    }

    #[test]
    fn landing_path_matching() {
        assert!(is_landing_path("/", "/"));
        assert!(is_landing_path("/", "/anything/at/all"));
        assert!(is_landing_path("/home", "/home"));
        assert!(!is_landing_path("/home", "/home/"));
        assert!(!is_landing_path("/home/", "/home"));
    }

    #[tokio::test]
    async fn dual_stack_listener() {
        let mut config = config::Config {
            disable_default_collectors: true,
            ..Default::default()
        };
        config.apply_defaults();
        let collector = collector::NodeCollector::new(&config).unwrap();
        let web_config = webconfig::WebConfig::default();

        let server = Server::bind(&listen_addrs(0), &config, &web_config, collector)
            .await
            .unwrap();
        let addr = spawn(server);
        let port = addr.port();

        let v4 = net::SocketAddr::from((net::Ipv4Addr::LOCALHOST, port));
        assert!(get(v4, "/", "").await.starts_with("HTTP/1.1 200 OK\r\n"));

        // hosts without IPv6 fall back to the IPv4 listener
        if addr.is_ipv6() && std::net::TcpListener::bind("[::1]:0").is_ok() {
            let v6 = net::SocketAddr::from((net::Ipv6Addr::LOCALHOST, port));
            assert!(get(v6, "/", "").await.starts_with("HTTP/1.1 200 OK\r\n"));
        }
    }

    #[tokio::test]
    async fn scrape_metrics() {
        let fixture = fixture(None, |_| ()).await;
        let addr = spawn(fixture.server);

        let resp = get(addr, "/metrics", "").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains(&format!("content-type: {}\r\n", metric::CONTENT_TYPE)));
        assert!(resp.contains("node_load1 0.25\n"));
        assert!(resp.contains("node_scrape_collector_success{collector=\"time\"} 1\n"));
        assert!(resp.contains("# TYPE node_exporter_build_info gauge\n"));
        assert!(resp.contains("promhttp_metric_handler_requests_in_flight 1\n"));
        assert!(resp.contains("promhttp_metric_handler_requests_total{code=\"200\"} 0\n"));

        let resp = get(addr, "/metrics", "").await;
        assert!(resp.contains("promhttp_metric_handler_requests_total{code=\"200\"} 1\n"));
    }

    #[tokio::test]
    async fn scrape_without_exporter_metrics() {
        let fixture = fixture(None, |config| config.disable_exporter_metrics = true).await;
        let addr = spawn(fixture.server);

        let resp = get(addr, "/metrics", "").await;
        assert!(resp.contains("node_load1 0.25\n"));
        assert!(!resp.contains("promhttp_"));
        assert!(!resp.contains("node_exporter_build_info"));
    }

    #[tokio::test]
    async fn scrape_with_collector_filter() {
        let fixture = fixture(None, |_| ()).await;
        let addr = spawn(fixture.server);

        let resp = get(addr, "/metrics?collect[]=time", "").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(!resp.contains("node_load1"));
        assert!(resp.contains("node_time_seconds"));

        let resp = get(addr, "/metrics?collect[]=cpu", "").await;
        assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(resp.contains("missing collector: cpu"));

        let resp = get(addr, "/metrics", "").await;
        assert!(resp.contains("promhttp_metric_handler_requests_total{code=\"400\"} 1\n"));
    }

    #[tokio::test]
    async fn scrape_limit() {
        let fixture = fixture(None, |config| config.max_requests = 1).await;
        let held = fixture
            .server
            .shared
            .limiter
            .clone()
            .try_acquire_owned()
            .unwrap();
        let addr = spawn(fixture.server);

        let resp = get(addr, "/metrics", "").await;
        assert!(resp.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(resp.ends_with("Limit of concurrent requests reached (1), try again later.\n"));

        // the landing page is not limited
        assert!(get(addr, "/", "").await.starts_with("HTTP/1.1 200 OK\r\n"));

        drop(held);
        let resp = get(addr, "/metrics", "").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("promhttp_metric_handler_requests_total{code=\"503\"} 1\n"));
    }

    #[tokio::test]
    async fn basic_auth_and_headers() {
        let hash = bcrypt::hash("secret", 4).unwrap();
        let yaml = format!(
            "http_server_config:\n  headers:\n    X-Frame-Options: deny\n\
             basic_auth_users:\n  alice: '{hash}'\n"
        );
        let fixture = fixture(Some(&yaml), |_| ()).await;
        let addr = spawn(fixture.server);

        let resp = get(addr, "/metrics", "").await;
        assert!(resp.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(resp.contains("www-authenticate: Basic\r\n"));
        assert!(resp.contains("x-frame-options: deny\r\n"));

        let resp = get(addr, "/", &basic("alice", "wrong")).await;
        assert!(resp.starts_with("HTTP/1.1 401 Unauthorized\r\n"));

        let resp = get(addr, "/metrics", &basic("alice", "secret")).await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(resp.contains("x-frame-options: deny\r\n"));
        assert!(resp.contains("node_load1 0.25\n"));
    }

    #[tokio::test]
    async fn tls_rejects_plain_http() {
        let yaml = "tls_server_config:\n  cert_file: server.crt\n  key_file: server.key\n";
        let fixture = fixture(Some(yaml), |_| ()).await;
        let addr = spawn(fixture.server);

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        assert!(!buf.starts_with(b"HTTP/"));
    }

    #[tokio::test]
    async fn bind_fails_on_bad_tls_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("web.yml"), "tls_server_config:\n  cert_file: a\n  key_file: b\n")
            .unwrap();
        let web_config =
            webconfig::WebConfig::load(dir.path().join("web.yml").to_str().unwrap()).unwrap();

        let mut config = config::Config {
            disable_default_collectors: true,
            ..Default::default()
        };
        config.apply_defaults();
        let collector = collector::NodeCollector::new(&config).unwrap();

        let addr = net::SocketAddr::from(([127, 0, 0, 1], 0));
        assert!(
            Server::bind(&[addr], &config, &web_config, collector)
                .await
                .is_err()
        );
    }
}
