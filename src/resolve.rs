//! Repository request resolution.
//!
//! One call to [`check`] covers the whole life of a repository request:
//! classify the path, fan a `HEAD` probe out to every capable peer (plus
//! upstream for database files), race the replies, and render the final
//! response. The first acceptable answer wins, so the outcome under racing
//! peers is deliberately arrival-order dependent.

use std::net::IpAddr;
use std::rc::Rc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::stream::{FuturesUnordered, StreamExt};
use http::StatusCode;

use crate::hub::Hub;
use crate::peer::{FileKind, Peer, PeerState, ProbeReply};
use crate::proto::reply;

enum Class {
    Database,
    Package,
    /// `.files` indexes are not kept by peers; they go straight upstream.
    UpstreamOnly,
    Unknown,
}

fn classify(filename: &str) -> Class {
    if filename.ends_with(".db") || filename.ends_with(".db.sig") {
        Class::Database
    } else if filename.ends_with(".files") || filename.ends_with(".files.sig") {
        Class::UpstreamOnly
    } else if filename.ends_with(".pkg.tar.xz") {
        Class::Package
    } else {
        Class::Unknown
    }
}

/// Resolves one `/repo/<filename>` request to a ready-to-write response.
pub(crate) async fn check(
    hub: &Hub,
    filename: &str,
    if_modified_since: Option<SystemTime>,
    client: IpAddr,
) -> Bytes {
    // everything after '#' is a fragment; drop it before classifying
    let filename = match filename.find('#') {
        Some(at) => &filename[..at],
        None => filename,
    };
    if filename.is_empty() {
        debug!("empty repo path");
        return reply::bad_request("Repository url empty");
    }
    // repository urls never take parameters
    if filename.contains('?') {
        debug!(%filename, "cannot parse repository url");
        return reply::bad_request("Repository url invalid");
    }

    let kind = match classify(filename) {
        Class::Database => FileKind::Database,
        Class::Package => FileKind::Package,
        Class::UpstreamOnly => {
            hub.stats.served_total.incr();
            hub.stats.served_upstream.incr();
            debug!(%filename, "sending file request straight to upstream");
            return reply::redirect(&hub.upstream.redirect_url(FileKind::Package, filename));
        }
        Class::Unknown => {
            hub.stats.unknown_repo_requests.incr();
            return reply::bad_request("Unknown pacman request");
        }
    };
    hub.stats.served_total.incr();

    let mut orig_peer = None;
    let mut pending = Vec::new();
    for peer in &hub.peers {
        if peer.addr().map_or(false, |addr| addr == client) {
            // the request came from this peer's own host; don't bounce it back
            orig_peer = Some(peer.clone());
            continue;
        }
        if peer.state() == PeerState::Failed {
            continue;
        }
        let path = match peer.probe_path(kind, filename) {
            Some(path) => path,
            None => continue,
        };
        if let Some(rx) = peer.clone().probe(path) {
            pending.push((peer.clone(), rx));
        }
    }

    if pending.is_empty() {
        debug!(%filename, "no suitable local peers");
        hub.stats.served_upstream.incr();
        return reply::redirect(&hub.upstream.redirect_url(kind, filename));
    }

    // Database freshness can only be judged against the canonical copy, so
    // upstream joins the race; package existence needs no second opinion.
    if kind == FileKind::Database {
        if let Some(path) = hub.upstream.probe_path(kind, filename) {
            if let Some(rx) = hub.upstream.clone().probe(path) {
                pending.push((hub.upstream.clone(), rx));
            }
        }
    }

    let mut file_check = FileCheck::new(kind, if_modified_since);
    let mut replies: FuturesUnordered<_> = pending
        .into_iter()
        .map(|(peer, rx)| async move { (peer, rx.await) })
        .collect();

    while let Some((peer, outcome)) = replies.next().await {
        let probe_reply = match outcome {
            Ok(probe_reply) => probe_reply,
            // the connection was recycled under the probe
            Err(_) => continue,
        };
        if let Some(verdict) = file_check.on_reply(&peer, &probe_reply) {
            return conclude(hub, kind, filename, orig_peer.as_ref(), verdict);
        }
    }

    // every probe came back empty-handed; upstream is the terminal fallback
    debug!(%filename, "no suitable repo found");
    hub.stats.served_upstream.incr();
    reply::redirect(&hub.upstream.redirect_url(kind, filename))
}

/// Decision state for one in-flight repository request.
struct FileCheck {
    kind: FileKind,
    if_modified_since: Option<SystemTime>,
    best_peer: Option<Rc<Peer>>,
    best_peer_time: Option<SystemTime>,
    upstream_time: Option<SystemTime>,
}

enum Verdict {
    Redirect {
        peer: Rc<Peer>,
        /// `Content-Length` of the reply that picked the peer; feeds the
        /// shared/received byte counters.
        bytes: Option<u64>,
    },
    NotModified,
    MissingUpstream,
}

impl FileCheck {
    fn new(kind: FileKind, if_modified_since: Option<SystemTime>) -> FileCheck {
        FileCheck {
            kind,
            if_modified_since,
            best_peer: None,
            best_peer_time: None,
            upstream_time: None,
        }
    }

    /// Folds one probe reply into the decision. `None` means keep waiting.
    fn on_reply(&mut self, peer: &Rc<Peer>, reply: &ProbeReply) -> Option<Verdict> {
        match reply.status {
            200 if self.kind == FileKind::Package => {
                // existence is all a package request needs
                Some(Verdict::Redirect {
                    peer: peer.clone(),
                    bytes: reply.content_length,
                })
            }
            200 if peer.is_upstream() => {
                self.upstream_time = reply.last_modified;
                if let (Some(since), Some(upstream)) = (self.if_modified_since, reply.last_modified)
                {
                    if since >= upstream {
                        return Some(Verdict::NotModified);
                    }
                }
                if let (Some(best), Some(upstream)) = (self.best_peer_time, reply.last_modified) {
                    if best >= upstream {
                        if let Some(best_peer) = self.best_peer.clone() {
                            return Some(Verdict::Redirect {
                                peer: best_peer,
                                bytes: reply.content_length,
                            });
                        }
                    }
                }
                // upstream named the canonical mtime but no peer has caught
                // up yet
                None
            }
            200 => {
                let modified = match reply.last_modified {
                    Some(modified) => modified,
                    None => return None,
                };
                if self.best_peer_time.map_or(true, |best| best < modified) {
                    // best peer is the one with the newest database copy
                    self.best_peer = Some(peer.clone());
                    self.best_peer_time = Some(modified);
                    if let Some(upstream) = self.upstream_time {
                        if modified >= upstream {
                            return Some(Verdict::Redirect {
                                peer: peer.clone(),
                                bytes: reply.content_length,
                            });
                        }
                    }
                }
                None
            }
            404 if peer.is_upstream() => Some(Verdict::MissingUpstream),
            404 => None,
            status => {
                info!(peer = %peer.host, status, "unexpected response code");
                None
            }
        }
    }
}

fn conclude(
    hub: &Hub,
    kind: FileKind,
    filename: &str,
    orig_peer: Option<&Rc<Peer>>,
    verdict: Verdict,
) -> Bytes {
    match verdict {
        Verdict::Redirect { peer, bytes } => {
            hub.stats.served_locally.incr();
            if let Some(bytes) = bytes {
                peer.shared.add(bytes);
                if let Some(orig) = orig_peer {
                    orig.received.add(bytes);
                }
            }
            let url = peer.redirect_url(kind, filename);
            debug!(%url, "redirecting to peer");
            reply::redirect(&url)
        }
        Verdict::NotModified => {
            hub.stats.not_modified.incr();
            reply::empty(StatusCode::NOT_MODIFIED)
        }
        Verdict::MissingUpstream => {
            warn!(%filename, "requested database file does not exist upstream");
            hub.stats.failed_upstream.incr();
            reply::empty(StatusCode::NOT_FOUND)
        }
    }
}
