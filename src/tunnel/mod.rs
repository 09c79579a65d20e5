pub mod fingerprint;
pub mod model;
pub mod ssh;
pub mod tls;

use log::{debug, error};
use std::io;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite};

/// Copies bytes both ways until either side closes.
pub(crate) async fn splice<A, B>(mut a: A, mut b: B, label: &str)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    match copy_bidirectional(&mut a, &mut b).await {
        Ok((bytes_tx, bytes_rx)) => {
            debug!("{label}: closed, TX {bytes_tx} bytes, RX {bytes_rx} bytes");
        }
        Err(e) if is_disconnect(&e) => debug!("{label}: peer went away: {e}"),
        Err(e) => error!("{label}: {e}"),
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
