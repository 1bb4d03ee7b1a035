//! The listening side of the hub.

mod conn;

use std::net::SocketAddr;
use std::rc::Rc;

use tokio::net::TcpListener;
use tokio::task;

use crate::config::Config;
use crate::error::Error;
use crate::hub::Hub;

/// A bound hub ready to serve.
///
/// Binding and serving are split so a caller can learn the actual listening
/// address (useful with port 0) before the accept loop starts. `run` must be
/// driven inside a [`tokio::task::LocalSet`] on a current-thread runtime:
/// the hub spawns only local, non-`Send` tasks.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    hub: Rc<Hub>,
}

impl Server {
    /// Binds the listening socket described by `config`.
    pub async fn bind(config: &Config) -> crate::Result<Server> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(Error::new_listen)?;
        let local_addr = listener.local_addr().map_err(Error::new_listen)?;
        Ok(Server {
            listener,
            local_addr,
            hub: Rc::new(Hub::new(config)),
        })
    }

    /// The address the hub is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts and serves clients forever.
    pub async fn run(self) -> crate::Result<()> {
        info!(addr = %self.local_addr, "listening");
        loop {
            match self.listener.accept().await {
                Ok((sock, remote)) => {
                    debug!(client = %remote, "new client connection");
                    task::spawn_local(conn::serve(sock, remote, self.hub.clone()));
                }
                Err(err) => {
                    // transient accept failures (per-process fd limits and
                    // the like) should not take the hub down
                    warn!(error = %err, "accept failed");
                }
            }
        }
    }
}
