//! Process-wide context, dependency-injected into every connection.

use std::rc::Rc;

use crate::config::Config;
use crate::peer::Peer;
use crate::stats::Stats;

pub(crate) struct Hub {
    /// Configured peers, probed in this order.
    pub(crate) peers: Vec<Rc<Peer>>,
    /// The terminal fallback; structurally a peer that holds everything.
    pub(crate) upstream: Rc<Peer>,
    pub(crate) stats: Stats,
}

impl Hub {
    pub(crate) fn new(config: &Config) -> Hub {
        let peers = config
            .peers
            .iter()
            .map(|peer| Peer::new(peer, config.probe_timeout))
            .collect();
        let upstream = Peer::upstream(&config.upstream, config.probe_timeout);
        Hub {
            peers,
            upstream,
            stats: Stats::default(),
        }
    }
}
