//! REST gateway in front of the ledger.
//!
//! Reads are plain JSON GETs; an unknown id (HTTP 404) is a validation
//! error. Writes are signed with the node identity the same way peer
//! requests are. Power change events arrive as a newline-delimited JSON
//! stream.

use async_trait::async_trait;
use fpm_core::{
    unix_now, EventFeed, EventStream, FarmId, Ledger, NodeId, NodeRecord, PowerChangeEvent,
    PowerError, PowerState, Result,
};
use fpm_crypto::{signed, Identity};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Buffer between the HTTP stream reader and the event consumer.
pub const EVENT_BUFFER: usize = 64;

/// Longest accepted event line.
pub const MAX_EVENT_LINE: usize = 64 * 1024;

/// Body of `POST {base}/nodes/{id}/uptime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeReport {
    pub uptime: u64,
}

fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

pub struct RestLedger {
    base: String,
    identity: Arc<Identity>,
    node: NodeId,
    http: reqwest::Client,
}

impl RestLedger {
    pub fn new(base: &str, identity: Arc<Identity>, node: NodeId, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PowerError::Fatal(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            base: trim_base(base),
            identity,
            node,
            http,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PowerError::Connection(format!("GET {}: {}", url, e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PowerError::Validation(format!("GET {}: not found", url)));
        }
        if !resp.status().is_success() {
            return Err(PowerError::Ledger(format!("GET {}: HTTP {}", url, resp.status())));
        }

        resp.json::<T>()
            .await
            .map_err(|e| PowerError::Ledger(format!("GET {}: bad response: {}", url, e)))
    }

    async fn post_signed<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let url = format!("{}{}", self.base, path);
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| PowerError::Validation(format!("invalid ledger url {}: {}", url, e)))?;
        let body = serde_json::to_vec(value)
            .map_err(|e| PowerError::Validation(format!("failed to encode body: {}", e)))?;

        let headers = signed::sign_request(
            &self.identity,
            self.node.0,
            "POST",
            parsed.path(),
            unix_now(),
            &body,
        );

        let mut request = self
            .http
            .post(parsed)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }

        let resp = request
            .body(body)
            .send()
            .await
            .map_err(|e| PowerError::Connection(format!("POST {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(PowerError::Ledger(format!("POST {}: HTTP {}", url, resp.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for RestLedger {
    async fn get_node(&self, id: NodeId) -> Result<NodeRecord> {
        self.get_json(&format!("/nodes/{}", id)).await
    }

    async fn farm_nodes(&self, farm: FarmId) -> Result<Vec<NodeId>> {
        self.get_json(&format!("/farms/{}/nodes", farm)).await
    }

    async fn set_power_state(&self, node: NodeId, state: PowerState) -> Result<()> {
        self.post_signed(&format!("/nodes/{}/power", node), &state)
            .await
    }

    async fn report_uptime(&self, node: NodeId, uptime_secs: u64) -> Result<()> {
        self.post_signed(
            &format!("/nodes/{}/uptime", node),
            &UptimeReport {
                uptime: uptime_secs,
            },
        )
        .await
    }
}

/// Subscribes to `GET {base}/events/power`.
pub struct RestEventFeed {
    base: String,
    http: reqwest::Client,
}

impl RestEventFeed {
    pub fn new(base: &str, connect_timeout: Duration) -> Result<Self> {
        // no overall timeout: the stream is long lived
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| PowerError::Fatal(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            base: trim_base(base),
            http,
        })
    }
}

#[async_trait]
impl EventFeed for RestEventFeed {
    async fn subscribe(&self) -> Result<EventStream> {
        let url = format!("{}/events/power", self.base);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| PowerError::Connection(format!("GET {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(PowerError::Stream(format!("GET {}: HTTP {}", url, resp.status())));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut chunks = resp.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();

            loop {
                // the consumer going away ends the reader and its connection
                let chunk = tokio::select! {
                    chunk = chunks.next() => chunk,
                    _ = tx.closed() => return,
                };
                let chunk = match chunk {
                    Some(Ok(c)) => c,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "power event stream broken");
                        return;
                    }
                    None => break,
                };
                pending.extend_from_slice(&chunk);

                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    if let Some(event) = decode_line(&line) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }

                if pending.len() > MAX_EVENT_LINE {
                    tracing::warn!(
                        bytes = pending.len(),
                        "power event line exceeds limit, dropping stream"
                    );
                    return;
                }
            }

            if let Some(event) = decode_line(&pending) {
                let _ = tx.send(event).await;
            }
        });

        Ok(rx)
    }
}

fn decode_line(line: &[u8]) -> Option<PowerChangeEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(line = %text, error = %e, "skipping malformed power event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpm_core::{EventTarget, Interface, NodePower, PowerTarget};
    use fpm_crypto::signed::{SIGNATURE_HEADER, SIGNER_HEADER, TIMESTAMP_HEADER};
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use warp::Filter;

    fn sample(id: u32) -> NodeRecord {
        NodeRecord {
            id: NodeId(id),
            farm_id: FarmId(7),
            public_key: "00".repeat(32),
            interfaces: vec![Interface {
                name: "zos".into(),
                mac: "02:00:00:00:00:09".into(),
                ips: vec!["10.0.0.9".into()],
            }],
            power: NodePower {
                target: PowerTarget::Up,
                state: PowerState::Up,
                last_up_time: 1_700_000_000,
            },
        }
    }

    type Posted = (String, String, u64, String, Vec<u8>);

    fn serve_ledger() -> (SocketAddr, mpsc::UnboundedReceiver<Posted>) {
        let (tx, rx) = mpsc::unbounded_channel::<Posted>();

        let node = warp::get()
            .and(warp::path!("api" / "nodes" / u32))
            .map(|id: u32| {
                if id == 404 {
                    warp::reply::with_status(
                        warp::reply::json(&"missing"),
                        warp::http::StatusCode::NOT_FOUND,
                    )
                } else {
                    warp::reply::with_status(
                        warp::reply::json(&sample(id)),
                        warp::http::StatusCode::OK,
                    )
                }
            });
        let farm = warp::get()
            .and(warp::path!("api" / "farms" / u32 / "nodes"))
            .map(|_farm: u32| warp::reply::json(&vec![1u32, 3, 9]));
        let events = warp::get()
            .and(warp::path!("api" / "events" / "power"))
            .map(|| {
                concat!(
                    "{\"farm_id\":7,\"node_id\":9,\"target\":\"down\"}\n",
                    "garbage\n",
                    "\n",
                    "{\"farm_id\":7,\"node_id\":3,\"target\":\"up\"}"
                )
            });
        let post = warp::post()
            .and(warp::path::full())
            .and(warp::header::<String>(SIGNER_HEADER))
            .and(warp::header::<u64>(TIMESTAMP_HEADER))
            .and(warp::header::<String>(SIGNATURE_HEADER))
            .and(warp::body::bytes())
            .map(
                move |path: warp::path::FullPath,
                      signer: String,
                      ts: u64,
                      sig: String,
                      body: bytes::Bytes| {
                    let _ = tx.send((path.as_str().to_string(), signer, ts, sig, body.to_vec()));
                    warp::reply()
                },
            );

        let (addr, server) = warp::serve(node.or(farm).or(events).or(post))
            .bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        (addr, rx)
    }

    fn ledger(addr: SocketAddr, identity: Arc<Identity>) -> RestLedger {
        RestLedger::new(
            &format!("http://{}/api/", addr),
            identity,
            NodeId(9),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reads() {
        let (addr, _rx) = serve_ledger();
        let ledger = ledger(addr, Arc::new(Identity::generate()));

        assert_eq!(ledger.get_node(NodeId(3)).await.unwrap(), sample(3));
        assert_eq!(
            ledger.farm_nodes(FarmId(7)).await.unwrap(),
            vec![NodeId(1), NodeId(3), NodeId(9)]
        );
        assert!(matches!(
            ledger.get_node(NodeId(404)).await,
            Err(PowerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_power_state_write_is_signed() {
        let (addr, mut rx) = serve_ledger();
        let identity = Arc::new(Identity::generate());
        let ledger = ledger(addr, identity.clone());

        ledger
            .set_power_state(NodeId(9), PowerState::Down { leader: NodeId(1) })
            .await
            .unwrap();

        let (path, signer, ts, sig, body) = rx.recv().await.unwrap();
        assert_eq!(path, "/api/nodes/9/power");
        assert_eq!(signer, "9");
        let state: PowerState = serde_json::from_slice(&body).unwrap();
        assert_eq!(state, PowerState::Down { leader: NodeId(1) });
        assert!(signed::verify_request(
            "POST",
            &path,
            ts,
            &body,
            &sig,
            &identity.public_key_hex()
        ));
    }

    #[tokio::test]
    async fn test_uptime_report() {
        let (addr, mut rx) = serve_ledger();
        let ledger = ledger(addr, Arc::new(Identity::generate()));

        ledger.report_uptime(NodeId(9), 4242).await.unwrap();
        let (path, _, _, _, body) = rx.recv().await.unwrap();
        assert_eq!(path, "/api/nodes/9/uptime");
        let report: UptimeReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.uptime, 4242);
    }

    #[tokio::test]
    async fn test_unreachable_ledger_is_transient() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let ledger = RestLedger::new(
            &format!("http://127.0.0.1:{}", port),
            Arc::new(Identity::generate()),
            NodeId(9),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = ledger.get_node(NodeId(1)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_event_stream_skips_malformed_lines_and_closes() {
        let (addr, _rx) = serve_ledger();
        let feed = RestEventFeed::new(&format!("http://{}/api", addr), Duration::from_secs(5))
            .unwrap();

        let mut events = feed.subscribe().await.unwrap();
        let first = events.recv().await.unwrap();
        assert_eq!(first.node_id, NodeId(9));
        assert_eq!(first.target, EventTarget::Down);
        let second = events.recv().await.unwrap();
        assert_eq!(second.node_id, NodeId(3));
        assert_eq!(second.target, EventTarget::Up);
        assert!(events.recv().await.is_none());
    }

    /// Serves one event stream request with `chunks`, then holds the
    /// connection open. The receiver fires once the client hangs up.
    async fn hold_open_feed(chunks: Vec<Vec<u8>>) -> (SocketAddr, oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (hung_up, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut head = Vec::new();
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }

            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n")
                .await;
            for chunk in chunks {
                let _ = socket
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await;
                let _ = socket.write_all(&chunk).await;
                let _ = socket.write_all(b"\r\n").await;
            }

            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = hung_up.send(());
        });

        (addr, rx)
    }

    #[tokio::test]
    async fn test_dropped_event_stream_releases_connection() {
        let (addr, hung_up) = hold_open_feed(vec![
            b"{\"farm_id\":7,\"node_id\":9,\"target\":\"down\"}\n".to_vec(),
        ])
        .await;
        let feed = RestEventFeed::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();

        let mut events = feed.subscribe().await.unwrap();
        assert_eq!(events.recv().await.unwrap().node_id, NodeId(9));
        drop(events);

        tokio::time::timeout(Duration::from_secs(5), hung_up)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_oversized_event_line_drops_stream() {
        let (addr, hung_up) = hold_open_feed(vec![vec![b'x'; MAX_EVENT_LINE + 1]]).await;
        let feed = RestEventFeed::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();

        let mut events = feed.subscribe().await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert!(next.is_none());

        tokio::time::timeout(Duration::from_secs(5), hung_up)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_error() {
        let (addr, _rx) = serve_ledger();
        let feed = RestEventFeed::new(&format!("http://{}/nowhere", addr), Duration::from_secs(5))
            .unwrap();
        assert!(matches!(
            feed.subscribe().await,
            Err(PowerError::Stream(_))
        ));
    }
}
