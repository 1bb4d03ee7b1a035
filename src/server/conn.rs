//! One inbound client connection.
//!
//! The read half parses pipelined HTTP/1.1 requests and routes each one as
//! soon as it is complete; repository requests resolve concurrently on their
//! own tasks. The write half owns the pipeline order: every request gets a
//! reply slot at parse time, and the writer drains the slots strictly in
//! arrival order, so a response computed early waits for every response owed
//! before it.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task;

use crate::hub::Hub;
use crate::proto::io::BoundedBuf;
use crate::proto::parse;
use crate::proto::reply;
use crate::resolve;
use crate::status;

const REPO_PREFIX: &str = "/repo/";
const RPC_PREFIX: &str = "/rpc/";

pub(crate) async fn serve<I>(io: I, remote: SocketAddr, hub: Rc<Hub>)
where
    I: AsyncRead + AsyncWrite + Unpin + 'static,
{
    let (rd, wr) = tokio::io::split(io);
    let (slots, pipeline) = mpsc::unbounded_channel();
    let writer = task::spawn_local(write_responses(wr, pipeline));

    match read_requests(rd, remote.ip(), &hub, &slots).await {
        Ok(()) => {
            // clean shutdown: let the writer finish the responses still owed
            drop(slots);
            let _ = writer.await;
        }
        Err(err) => {
            debug!(client = %remote, error = %err, "closing client connection");
            writer.abort();
        }
    }
}

async fn read_requests<R>(
    mut rd: R,
    client: IpAddr,
    hub: &Rc<Hub>,
    slots: &mpsc::UnboundedSender<oneshot::Receiver<Bytes>>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BoundedBuf::new();
    loop {
        let read = buf.read_from(&mut rd).await?;
        if read == 0 {
            return Ok(());
        }
        loop {
            match parse::request(buf.bytes()) {
                Ok(Some((request, len))) => {
                    buf.consume(len);
                    let (tx, rx) = oneshot::channel();
                    if slots.send(rx).is_err() {
                        return Err(io::ErrorKind::BrokenPipe.into());
                    }
                    dispatch(hub, request, client, tx);
                }
                Ok(None) => {
                    if buf.is_full() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "request headers exceed the buffer",
                        ));
                    }
                    break;
                }
                Err(err) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, err));
                }
            }
        }
    }
}

fn dispatch(hub: &Rc<Hub>, request: parse::Request, client: IpAddr, tx: oneshot::Sender<Bytes>) {
    debug!(path = %request.path, "request");
    if let Some(filename) = strip_prefix(&request.path, REPO_PREFIX) {
        let hub = hub.clone();
        let filename = filename.to_owned();
        let if_modified_since = request.if_modified_since;
        task::spawn_local(async move {
            let response = resolve::check(&hub, &filename, if_modified_since, client).await;
            // the client may be gone by now; its slot was dropped with it
            let _ = tx.send(response);
        });
    } else if let Some(method) = strip_prefix(&request.path, RPC_PREFIX) {
        let _ = tx.send(rpc(hub, method));
    } else {
        let _ = tx.send(reply::html(&status::render(hub)));
    }
}

fn rpc(hub: &Hub, method: &str) -> Bytes {
    match method {
        "ping" => {
            for peer in &hub.peers {
                peer.retry_failed();
            }
            debug!("retrying failed peers");
            reply::html("")
        }
        _ => reply::bad_request("Unknown RPC method"),
    }
}

fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if path.starts_with(prefix) {
        Some(&path[prefix.len()..])
    } else {
        None
    }
}

async fn write_responses<W>(mut wr: W, mut pipeline: mpsc::UnboundedReceiver<oneshot::Receiver<Bytes>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(slot) = pipeline.recv().await {
        let response = match slot.await {
            Ok(response) => response,
            // a reply slot can only vanish if its task died; give up on the
            // connection rather than break pipeline ordering
            Err(_) => break,
        };
        if wr.write_all(&response).await.is_err() {
            break;
        }
    }
}
