//! The HTTP status page.
//!
//! Renders the [`Store`]'s notes and the latest completed sample of every
//! defined metric. `GET /` answers in plain text, `GET /json` in JSON, which
//! also carries the last [`HISTORY`] samples of each metric. Any other path is
//! a 404.

use std::{collections::BTreeMap, fmt::Write, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::{Method, Request, Response, StatusCode, server::conn::http1};
use hyper_util::rt::TokioIo;
use metrics::counter;
use randfiles_store::{Rate, Store};
use serde::Serialize;
use tokio::{net::TcpListener, task::JoinSet};
use tracing::{debug, error, info};

use crate::signals::Watcher;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Server`].
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Number of most recent samples included per metric in `/json`.
pub const HISTORY: usize = 60;

#[derive(Debug, Serialize)]
struct Entry {
    #[serde(flatten)]
    rate: Rate,
    recent: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct Page<'a> {
    title: &'a str,
    ticks: usize,
    notes: BTreeMap<String, String>,
    metrics: Vec<Entry>,
}

impl<'a> Page<'a> {
    fn collect(store: &'a Store) -> Self {
        let metrics = store
            .rates()
            .into_iter()
            .map(|rate| {
                let recent = store
                    .get_metrics(&rate.metric, rate.dimension)
                    .tail(HISTORY)
                    .to_vec();
                Entry { rate, recent }
            })
            .collect();
        Self {
            title: store.title(),
            ticks: store.ticks(),
            notes: store.notes().into_iter().collect(),
            metrics,
        }
    }

    fn text(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{}\n", self.title);
        for (key, value) in &self.notes {
            let _ = writeln!(out, "{key}: {value}");
        }
        let _ = writeln!(out);
        for Entry { rate, .. } in &self.metrics {
            let _ = writeln!(
                out,
                "{} {}: {:.0} {}",
                rate.metric, rate.dimension, rate.last, rate.unit
            );
        }
        out
    }
}

fn full(body: impl Into<Bytes>) -> BoxBody<Bytes, hyper::Error> {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed()
}

fn respond(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Answer one request against `store`.
pub(crate) fn route<B>(
    req: &Request<B>,
    store: &Store,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    counter!("status_requests").increment(1);
    if req.method() != Method::GET {
        return respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "");
    }
    match req.uri().path() {
        "/" => respond(
            StatusCode::OK,
            "text/plain; charset=utf-8",
            Page::collect(store).text(),
        ),
        "/json" => match serde_json::to_vec(&Page::collect(store)) {
            Ok(body) => respond(StatusCode::OK, "application/json", body),
            Err(err) => {
                error!("could not serialize status page: {err}");
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "")
            }
        },
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found\n"),
    }
}

#[derive(Debug)]
/// The status page server.
pub struct Server {
    addr: SocketAddr,
    store: Arc<Store>,
    shutdown: Watcher,
}

impl Server {
    /// Create a new [`Server`]. Nothing is bound until [`Server::run`].
    #[must_use]
    pub fn new(addr: SocketAddr, store: Arc<Store>, shutdown: Watcher) -> Self {
        Self {
            addr,
            store,
            shutdown,
        }
    }

    /// Bind and serve until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn run(self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await;
        Ok(())
    }

    async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!("status page listening on http://{addr}/");
        }
        let mut join_set = JoinSet::new();

        let shutdown_fut = self.shutdown.recv();
        tokio::pin!(shutdown_fut);
        loop {
            tokio::select! {
                () = &mut shutdown_fut => {
                    info!("Shutdown signal received, stopping accept loop.");
                    break;
                }

                incoming = listener.accept() => {
                    let (stream, addr) = match incoming {
                        Ok(sa) => sa,
                        Err(e) => {
                            error!("Error accepting connection: {e}");
                            continue;
                        }
                    };
                    debug!("Accepted connection from {addr}");

                    let store = Arc::clone(&self.store);
                    join_set.spawn(async move {
                        let service = hyper::service::service_fn(move |req| {
                            let response = route(&req, &store);
                            async move { Ok::<_, hyper::Error>(response) }
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            error!("Error serving {addr}: {e}");
                        }
                    });
                }
            }
        }

        drop(listener);
        join_set.abort_all();
        while join_set.join_next().await.is_some() {}
    }
}
