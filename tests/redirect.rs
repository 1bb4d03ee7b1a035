//! End-to-end scenarios: a hub, mock peer mirrors on loopback aliases, and
//! a raw TCP client.

mod support;

use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use tokio::task::LocalSet;

use pachub::config::{Config, PeerConfig, Upstream};

use support::{assert_status_page, found, hang, missing, mock_mirror, start_hub, Client};

const PKG: &str = "/repo/core/os/x86_64/foo-1.0-1-x86_64.pkg.tar.xz";
const DB: &str = "/repo/core/os/x86_64/core.db";

fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn config(upstream: SocketAddr, peers: Vec<SocketAddr>) -> Config {
    Config {
        port: 0,
        upstream: Upstream {
            host: upstream.ip().to_string(),
            port: upstream.port(),
            prefix: "archlinux".to_owned(),
        },
        probe_timeout: Duration::from_secs(2),
        peers: peers
            .into_iter()
            .map(|peer| PeerConfig {
                host: peer.ip().to_string(),
                port: peer.port(),
                db_prefix: Some("db".to_owned()),
                pkg_prefix: Some("pkg".to_owned()),
            })
            .collect(),
    }
}

#[tokio::test]
async fn package_hit_redirects_to_the_peer() {
    LocalSet::new()
        .run_until(async {
            let upstream = mock_mirror("127.0.0.4", |_| missing()).await;
            let p1 = mock_mirror("127.0.0.2", |path| {
                assert_eq!(path, "/pkg/foo-1.0-1-x86_64.pkg.tar.xz");
                found(1024)
            })
            .await;
            let hub = start_hub(config(upstream, vec![p1])).await;

            let mut client = Client::connect(hub).await;
            client.get(PKG).await;
            let response = client.read_response().await;
            assert_eq!(response.status, 307);
            assert_eq!(
                response.header("location").unwrap(),
                format!(
                    "http://127.0.0.2:{}/pkg/foo-1.0-1-x86_64.pkg.tar.xz",
                    p1.port()
                )
            );
            assert_eq!(response.header("content-length").unwrap(), "0");

            assert_status_page(
                hub,
                &[
                    "served total: 1",
                    "served locally: 1",
                    "shared: 1.0 kB",
                ],
            )
            .await;
        })
        .await;
}

#[tokio::test]
async fn package_miss_falls_back_upstream() {
    LocalSet::new()
        .run_until(async {
            let upstream = mock_mirror("127.0.0.4", |_| missing()).await;
            let p1 = mock_mirror("127.0.0.2", |_| missing()).await;
            let hub = start_hub(config(upstream, vec![p1])).await;

            let mut client = Client::connect(hub).await;
            client.get(PKG).await;
            let response = client.read_response().await;
            assert_eq!(response.status, 307);
            assert_eq!(
                response.header("location").unwrap(),
                format!(
                    "http://127.0.0.4:{}/archlinux/core/os/x86_64/foo-1.0-1-x86_64.pkg.tar.xz",
                    upstream.port()
                )
            );

            assert_status_page(hub, &["served upstream: 1"]).await;
        })
        .await;
}

#[tokio::test]
async fn database_redirects_to_a_peer_as_fresh_as_upstream() {
    LocalSet::new()
        .run_until(async {
            let upstream = mock_mirror("127.0.0.4", |path| {
                assert_eq!(path, "/archlinux/core/os/x86_64/core.db");
                found(3000).last_modified(at(100))
            })
            .await;
            let p1 = mock_mirror("127.0.0.2", |path| {
                assert_eq!(path, "/db/core.db");
                found(3000).last_modified(at(100))
            })
            .await;
            let hub = start_hub(config(upstream, vec![p1])).await;

            let mut client = Client::connect(hub).await;
            client.get(DB).await;
            let response = client.read_response().await;
            assert_eq!(response.status, 307);
            assert_eq!(
                response.header("location").unwrap(),
                format!("http://127.0.0.2:{}/db/core.db", p1.port())
            );

            assert_status_page(hub, &["served locally: 1"]).await;
        })
        .await;
}

#[tokio::test]
async fn database_not_modified_is_idempotent() {
    LocalSet::new()
        .run_until(async {
            let upstream =
                mock_mirror("127.0.0.4", |_| found(3000).last_modified(at(100))).await;
            let p1 = mock_mirror("127.0.0.2", |_| found(3000).last_modified(at(100))).await;
            let hub = start_hub(config(upstream, vec![p1])).await;

            let request = format!(
                "GET {} HTTP/1.1\r\nHost: hub\r\nIf-Modified-Since: {}\r\n\r\n",
                DB,
                httpdate::fmt_http_date(at(200))
            );

            let mut client = Client::connect(hub).await;
            for _ in 0..2 {
                client.send(&request).await;
                let response = client.read_response().await;
                assert_eq!(response.status, 304);
                assert_eq!(response.header("content-length").unwrap(), "0");
            }

            assert_status_page(hub, &["database not modified: 2"]).await;
        })
        .await;
}

#[tokio::test]
async fn database_missing_upstream_is_a_404() {
    LocalSet::new()
        .run_until(async {
            let upstream = mock_mirror("127.0.0.4", |_| missing()).await;
            let p1 = mock_mirror("127.0.0.2", |_| missing()).await;
            let hub = start_hub(config(upstream, vec![p1])).await;

            let mut client = Client::connect(hub).await;
            client.get(DB).await;
            let response = client.read_response().await;
            assert_eq!(response.status, 404);

            assert_status_page(hub, &["upstream server did not reply: 1"]).await;
        })
        .await;
}

#[tokio::test]
async fn pipelined_responses_keep_request_order() {
    LocalSet::new()
        .run_until(async {
            let upstream = mock_mirror("127.0.0.4", |_| missing()).await;
            // the first request is slow on purpose; the second resolves
            // instantly but must wait its turn on the wire
            let p1 = mock_mirror("127.0.0.2", |_| {
                found(10).delayed(Duration::from_millis(300))
            })
            .await;
            let hub = start_hub(config(upstream, vec![p1])).await;

            let mut client = Client::connect(hub).await;
            client
                .send(&format!(
                    "GET {} HTTP/1.1\r\nHost: hub\r\n\r\nGET /repo/core/os/x86_64/core.files HTTP/1.1\r\nHost: hub\r\n\r\n",
                    PKG
                ))
                .await;

            let first = client.read_response().await;
            assert_eq!(first.status, 307);
            assert!(first
                .header("location")
                .unwrap()
                .starts_with(&format!("http://127.0.0.2:{}/pkg/", p1.port())));

            let second = client.read_response().await;
            assert_eq!(second.status, 307);
            assert_eq!(
                second.header("location").unwrap(),
                format!(
                    "http://127.0.0.4:{}/archlinux/core/os/x86_64/core.files",
                    upstream.port()
                )
            );
        })
        .await;
}

#[tokio::test]
async fn unanswered_peer_times_out_to_upstream() {
    LocalSet::new()
        .run_until(async {
            let upstream = mock_mirror("127.0.0.4", |_| missing()).await;
            let p1 = mock_mirror("127.0.0.2", |_| hang()).await;
            let mut config = config(upstream, vec![p1]);
            config.probe_timeout = Duration::from_millis(200);
            let hub = start_hub(config).await;

            let mut client = Client::connect(hub).await;
            client.get(PKG).await;
            let response = client.read_response().await;
            assert_eq!(response.status, 307);
            assert!(response
                .header("location")
                .unwrap()
                .starts_with(&format!("http://127.0.0.4:{}/archlinux/", upstream.port())));

            assert_status_page(hub, &["served upstream: 1"]).await;
        })
        .await;
}

#[tokio::test]
async fn ping_revives_failed_peers() {
    LocalSet::new()
        .run_until(async {
            let upstream = mock_mirror("127.0.0.4", |_| missing()).await;
            // a peer that refuses connections: bind, note the port, close
            let dead = {
                let listener = tokio::net::TcpListener::bind("127.0.0.2:0").await.unwrap();
                listener.local_addr().unwrap()
            };
            let hub = start_hub(config(upstream, vec![dead])).await;

            let mut client = Client::connect(hub).await;
            client.get(PKG).await;
            let response = client.read_response().await;
            assert_eq!(response.status, 307); // upstream fallback
            assert_status_page(hub, &["color:grey"]).await;

            for _ in 0..2 {
                client.get("/rpc/ping").await;
                let response = client.read_response().await;
                assert_eq!(response.status, 200);
            }
            assert_status_page(hub, &["color:green"]).await;
        })
        .await;
}

#[tokio::test]
async fn unknown_suffix_is_a_400() {
    LocalSet::new()
        .run_until(async {
            let upstream = mock_mirror("127.0.0.4", |_| missing()).await;
            let hub = start_hub(config(upstream, vec![])).await;

            let mut client = Client::connect(hub).await;
            client.get("/repo/core/os/x86_64/README.txt").await;
            let response = client.read_response().await;
            assert_eq!(response.status, 400);
            assert_eq!(response.reason, "Unknown pacman request");

            assert_status_page(hub, &["unknown repo requests: 1"]).await;
        })
        .await;
}
