//! `MetricsExporter` and closely related types.

use std::{
    convert::Infallible,
    fmt,
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    time::Instant,
};

use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use resource_metrics::{Format, Registry};
use tokio::{io, net::TcpListener, sync::watch};

use crate::metrics::ExporterMetrics;


const DEFAULT_TELEMETRY_PATH: &str = "/metrics";

#[derive(Clone)]
struct MetricsExporterInner {
    registry: Arc<Registry>,
    format: Format,
    telemetry_path: Arc<str>,
    metrics: ExporterMetrics,
}

impl MetricsExporterInner {
    async fn render_body(&self) -> String {
        let started_at = Instant::now();
        let registry = Arc::clone(&self.registry);
        let format = self.format;
        // Scrape sources only lock their caches, but encoding a large registry is CPU-bound,
        // so it's moved off the I/O threads.
        let encoded = tokio::task::spawn_blocking(move || {
            let mut buffer = String::with_capacity(4_096);
            registry.encode(&mut buffer, format).map(|()| buffer)
        })
        .await;

        let buffer = match encoded {
            Ok(Ok(buffer)) => buffer,
            Ok(Err(err)) => {
                tracing::error!(%err, "Failed encoding metrics");
                String::new()
            }
            Err(err) => {
                tracing::error!(%err, "Metrics encoding task panicked");
                String::new()
            }
        };

        let latency = started_at.elapsed();
        let scraped_size = buffer.len();
        self.metrics.observe_scrape(latency, scraped_size);
        tracing::debug!(
            latency_sec = latency.as_secs_f64(),
            scraped_size,
            "Scraped metrics in {latency:?} (scraped size: {scraped_size}B)"
        );
        buffer
    }

    fn landing_page(&self) -> String {
        format!(
            "<html>\n\
             <head><title>AWS Resources Exporter</title></head>\n\
             <body>\n\
             <h1>AWS Resources Exporter</h1>\n\
             <p><a href=\"{path}\">Metrics</a></p>\n\
             </body>\n\
             </html>\n",
            path = self.telemetry_path
        )
    }

    async fn handle(&self, request: Request<Incoming>) -> Response<String> {
        if !matches!(*request.method(), Method::GET | Method::HEAD) {
            return Self::plain_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
        }

        let path = request.uri().path();
        if path == &*self.telemetry_path {
            Self::response(self.format.content_type(), self.render_body().await)
        } else if path == "/" {
            Self::response("text/html; charset=utf-8", self.landing_page())
        } else {
            Self::plain_response(StatusCode::NOT_FOUND, "Not Found\n")
        }
    }

    fn response(content_type: &str, body: String) -> Response<String> {
        let mut response = Response::new(body);
        if let Ok(value) = header::HeaderValue::from_str(content_type) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }

    fn plain_response(status: StatusCode, body: &str) -> Response<String> {
        let mut response = Self::response("text/plain; charset=utf-8", body.to_owned());
        *response.status_mut() = status;
        response
    }
}

/// Metrics exporter to Prometheus.
///
/// The exporter serves metrics from a [`Registry`] over HTTP:
///
/// - `GET` on the telemetry path (`/metrics` by default) serves metrics in the configured [`Format`]
/// - `GET /` serves a landing page linking to the telemetry path
/// - all other paths respond with 404
pub struct MetricsExporter<'a> {
    inner: MetricsExporterInner,
    shutdown_future: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
}

impl fmt::Debug for MetricsExporter<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsExporter")
            .field("registry", &self.inner.registry)
            .field("format", &self.inner.format)
            .field("telemetry_path", &self.inner.telemetry_path)
            .finish_non_exhaustive()
    }
}

impl<'a> MetricsExporter<'a> {
    /// Creates an exporter based on the provided metrics [`Registry`].
    pub fn new(registry: Arc<Registry>) -> Self {
        tracing::info!(
            "Created metrics exporter with {} metric families from {} scrape sources",
            registry.descriptor_count(),
            registry.source_count()
        );
        Self {
            inner: MetricsExporterInner {
                registry,
                format: Format::Prometheus,
                telemetry_path: DEFAULT_TELEMETRY_PATH.into(),
                metrics: ExporterMetrics::default(),
            },
            shutdown_future: Box::pin(future::pending()),
        }
    }

    /// Sets the export [`Format`]. By default, [`Format::Prometheus`] is used.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.inner.format = format;
        self
    }

    /// Sets the path on which metrics are served. A leading `/` is added if missing.
    #[must_use]
    pub fn with_telemetry_path(mut self, path: &str) -> Self {
        self.inner.telemetry_path = if path.starts_with('/') {
            path.into()
        } else {
            format!("/{path}").into()
        };
        self
    }

    /// Sets exporter metrics updated on each scrape. These metrics should be registered
    /// in the exported registry using [`ExporterMetrics::register()`].
    #[must_use]
    pub fn with_metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.inner.metrics = metrics;
        self
    }

    /// Configures graceful shutdown for the exporter server.
    #[must_use]
    pub fn with_graceful_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.shutdown_future = Box::pin(shutdown);
        self
    }

    /// Starts the server on the specified address. This future resolves when the server is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn start(self, bind_address: SocketAddr) -> io::Result<()> {
        tracing::info!("Starting metrics exporter web server on {bind_address}");
        self.bind(bind_address).await?.start().await?;
        tracing::info!("Metrics exporter server shut down");
        Ok(())
    }

    /// Creates an HTTP exporter server and binds it to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(mut self, bind_address: SocketAddr) -> io::Result<MetricsServer<'a>> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        let server = async move {
            let (started_shutdown_sender, started_shutdown) = watch::channel(());
            loop {
                let stream = tokio::select! {
                    res = listener.accept() => res?.0,
                    () = &mut self.shutdown_future => break,
                };

                let io = TokioIo::new(stream);
                let inner = self.inner.clone();
                let mut started_shutdown = started_shutdown.clone();
                tokio::spawn(async move {
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        service_fn(|request| {
                            let inner = inner.clone();
                            async move { Ok::<_, Infallible>(inner.handle(request).await) }
                        }),
                    );
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        _ = started_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                        res = conn.as_mut() => res,
                    };
                    if let Err(err) = res {
                        tracing::warn!(%err, "Error serving connection");
                    }
                });
            }

            tracing::info!("Stop signal received, metrics exporter is shutting down");
            // Send the graceful shutdown signal to all alive connections.
            drop(started_shutdown);
            started_shutdown_sender.send_replace(());
            // Wait until all connections are dropped.
            started_shutdown_sender.closed().await;

            Ok(())
        };

        Ok(MetricsServer {
            server: Box::pin(server),
            local_addr,
        })
    }
}

/// Metrics server bound to a certain local address returned by [`MetricsExporter::bind()`].
///
/// Useful e.g. if you need to find out which port the server was bound to if the 0th port was specified.
#[must_use = "Server should be `start()`ed"]
pub struct MetricsServer<'a> {
    server: Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for MetricsServer<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl MetricsServer<'_> {
    /// Returns the local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts this server. Resolves once the server is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting connections fails.
    pub async fn start(self) -> io::Result<()> {
        self.server.await
    }
}
