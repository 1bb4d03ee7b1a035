//! The HTML status page.

use std::fmt::Write;

use crate::hub::Hub;
use crate::peer::{FileKind, PeerState};
use crate::stats::human_size;

pub(crate) fn render(hub: &Hub) -> String {
    let mut page = String::from(
        "<html><head><title>pachub status</title></head><body><h1>Available peers</h1><ul>",
    );

    let mut total_saved = 0u64;
    for peer in &hub.peers {
        let color = if peer.state() == PeerState::Failed {
            "grey"
        } else {
            "green"
        };
        let _ = write!(
            page,
            "<li><span style='color:{}'>{}</span> (shared: {}, received: {})",
            color,
            peer.host,
            human_size(peer.shared.get()),
            human_size(peer.received.get())
        );
        if peer.prefix(FileKind::Package).is_some() {
            let _ = write!(
                page,
                " <a href='{}'>packages</a>",
                peer.redirect_url(FileKind::Package, "")
            );
        }
        if peer.prefix(FileKind::Database).is_some() {
            let _ = write!(
                page,
                " <a href='{}'>database</a>",
                peer.redirect_url(FileKind::Database, "")
            );
        }
        page.push_str("</li>");
        total_saved += peer.shared.get();
    }

    let _ = write!(
        page,
        "</ul><h4>Total saved: {}</h4><h4>Request statistics:</h4><ul>",
        human_size(total_saved)
    );
    let stats = &hub.stats;
    let _ = write!(page, "<li>served total: {}</li>", stats.served_total.get());
    let _ = write!(
        page,
        "<li>served upstream: {}</li>",
        stats.served_upstream.get()
    );
    let _ = write!(
        page,
        "<li>served locally: {}</li>",
        stats.served_locally.get()
    );
    let _ = write!(
        page,
        "<li>database not modified: {}</li>",
        stats.not_modified.get()
    );
    let _ = write!(
        page,
        "<li>upstream server did not reply: {}</li>",
        stats.failed_upstream.get()
    );
    let _ = write!(
        page,
        "<li>unknown repo requests: {}</li>",
        stats.unknown_repo_requests.get()
    );
    page.push_str("</ul></body></html>\n");

    page
}
