//! Server runtime
//!
//! Accept loop plus one task per control connection. Each task multiplexes
//! the control socket, the call channel, and the protocol timers over a
//! single [`PptpConn`] engine.

pub mod call;
pub mod channel;
pub mod conn;
pub mod fsm;

pub use call::{CallChannel, ChannelFactory, PppCall};
pub use channel::{KernelChannel, KernelChannelFactory};
pub use conn::{ConnSettings, ConnState, ControlTransport, PptpConn};

use crate::config::Config;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Accept control connections until interrupted.
pub async fn run(config: Config, metrics: Arc<MetricsRegistry>) -> Result<()> {
    let listener = TcpListener::bind(config.server.listen).await?;
    info!("listening on {}", config.server.listen);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                metrics.conn_opened();

                let settings = config.conn_settings();
                let local = config.server.local_addr;
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    info!(%peer, "control connection accepted");
                    if let Err(e) = serve_conn(stream, peer, local, settings, &metrics).await {
                        warn!(%peer, "connection error: {}", e);
                        metrics.connections_failed.inc();
                        if matches!(e, Error::Codec(_)) {
                            metrics.codec_errors.inc();
                        }
                    }
                    metrics.conn_closed();
                    debug!(%peer, "connection task done");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                for (name, value) in metrics.export() {
                    info!("{} = {}", name, value);
                }
                return Ok(());
            }
        }
    }
}

/// Non-blocking write half of a tokio TCP stream.
///
/// Write interest is level-driven by [`PptpConn::wants_write`] in the serve
/// loop, so the explicit interest callback has nothing left to do here.
struct TcpTransport {
    stream: Arc<TcpStream>,
}

impl ControlTransport for TcpTransport {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn set_write_interest(&mut self, _enabled: bool) {}
}

async fn serve_conn(
    stream: TcpStream,
    peer: SocketAddr,
    local: std::net::Ipv4Addr,
    settings: ConnSettings,
    metrics: &MetricsRegistry,
) -> Result<()> {
    let peer_ip = match peer.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => {
            return Err(Error::Protocol("IPv6 control peers are not supported".into()));
        }
    };

    let stream = Arc::new(stream);
    let transport = TcpTransport {
        stream: stream.clone(),
    };
    let factory = KernelChannelFactory::new(local, peer_ip);
    let mut conn = PptpConn::new(transport, factory, settings);

    let mut buf = vec![0u8; 2048];
    let mut was_established = false;
    let mut had_call = false;
    let mut refusals_seen = 0;

    loop {
        let deadline = conn.next_deadline();

        tokio::select! {
            ready = stream.readable() => {
                ready?;
                match stream.try_read(&mut buf) {
                    Ok(0) => {
                        info!(%peer, "peer closed control connection");
                        return Ok(());
                    }
                    Ok(n) => {
                        let dispatched = conn.handle_data(&buf[..n])?;
                        metrics.ctrl_messages_rx.add(dispatched as u64);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }
            ready = stream.writable(), if conn.wants_write() => {
                ready?;
                conn.handle_writable()?;
            }
            _ = tokio::time::sleep_until(deadline.into()) => {
                if conn.on_timer(Instant::now())? {
                    return Ok(());
                }
            }
            ready = channel_readable(&conn) => {
                ready?;
                conn.call_mut().pump_channel()?;
                metrics.frames_rx.inc();
            }
        }

        if !was_established && conn.state() == ConnState::Established {
            was_established = true;
            metrics.connections_established.inc();
        }
        if conn.state() == ConnState::Finishing && was_established {
            was_established = false;
            metrics.connections_stopped.inc();
        }
        if !had_call && conn.call().is_established() {
            had_call = true;
            metrics.calls_opened.inc();
        }
        let refused = conn.calls_refused();
        if refused > refusals_seen {
            metrics.calls_failed.add((refused - refusals_seen) as u64);
            refusals_seen = refused;
        }
    }
}

/// Resolves when the call channel may have frames pending; parks forever
/// while no call is up.
async fn channel_readable<T: ControlTransport>(
    conn: &PptpConn<T, KernelChannelFactory>,
) -> io::Result<()> {
    match conn.call().channel() {
        Some(ch) => ch.readable().await,
        None => std::future::pending().await,
    }
}
