//-
// Copyright (c) 2026, The Mallard Authors
//
// This file is part of Mallard.
//
// Mallard is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mallard is distributed  in the hope that it  will be useful,  but WITHOUT
// ANY  WARRANTY;  without  even  the implied  warranty of  MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Mallard. If not, see <http://www.gnu.org/licenses/>.

//! Listener setup and the accept loops: one worker thread per accepted
//! connection, each owning its session end to end.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};

use crate::imap;
use crate::lmtp;
use crate::store::blob::{BlobStore, MemoryBlobStore};
use crate::store::memory::MemoryStore;
use crate::store::Store;
use crate::support::error::Error;
use crate::support::ids::{
    ArcClock, ArcIdSource, RandomIdSource, SystemClock,
};
use crate::support::log_prefix::LogPrefix;
use crate::support::net::{SessionStream, TcpTransport};
use crate::support::system_config::SystemConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocols {
    Imap,
    Lmtp,
    All,
}

/// Grace period for in-flight sessions during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shared state of the serving process: the stop flag plus the live
/// session count the grace period waits on.
#[derive(Default)]
pub struct ServerState {
    stopping: AtomicBool,
    live_sessions: AtomicUsize,
}

impl ServerState {
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Blocks until in-flight sessions finish or the grace period runs
    /// out; stragglers are abandoned to their transport deadlines.
    pub fn await_grace(&self) {
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.live_sessions.load(Ordering::SeqCst) > 0
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(100));
        }

        let stragglers = self.live_sessions.load(Ordering::SeqCst);
        if stragglers > 0 {
            warn!(
                "{} session(s) missed the shutdown grace period",
                stragglers
            );
        }
    }
}

struct SessionGuard(Arc<ServerState>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn serve(
    config: SystemConfig,
    protocols: Protocols,
    demo_user: Option<&str>,
) -> Result<(), Error> {
    let config = Arc::new(config);
    let clock: ArcClock = Arc::new(SystemClock);
    let ids: ArcIdSource = Arc::new(RandomIdSource);
    let store: Arc<MemoryStore> =
        Arc::new(MemoryStore::new(Arc::clone(&clock), Arc::clone(&ids)));
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

    if let Some(spec) = demo_user {
        let mut parts = spec.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(password), Some(address)) => {
                store.create_user(name, password, address)?;
                info!("Created account {} <{}>", name, address);
            },
            _ => {
                return Err(Error::StoreUnavailable(
                    "--demo-user wants name:password:address".to_owned(),
                ))
            },
        }
    }

    let ssl_acceptor = match config.tls {
        Some(ref tls) => Some(Arc::new(create_ssl_acceptor(
            &tls.cert.to_string_lossy(),
            &tls.key.to_string_lossy(),
        )?)),
        None => {
            if config.imap.secure {
                return Err(Error::TlsNotAvailable);
            }
            None
        },
    };

    let state = Arc::new(ServerState::default());
    let store: Arc<dyn Store> = store;
    let mut listeners = Vec::new();

    if Protocols::Lmtp != protocols {
        let listener = TcpListener::bind((
            config.imap.host.as_str(),
            config.imap.port,
        ))?;
        info!(
            "IMAP{} listening on {}:{}",
            if config.imap.secure { "S" } else { "" },
            config.imap.host,
            config.imap.port,
        );
        listeners.push(spawn_accept_loop(
            listener,
            Arc::clone(&state),
            "imap",
            {
                let config = Arc::clone(&config);
                let store = Arc::clone(&store);
                let blobs = Arc::clone(&blobs);
                let clock = Arc::clone(&clock);
                let ids = Arc::clone(&ids);
                let ssl_acceptor = ssl_acceptor.clone();
                move |stream, log_prefix| {
                    serve_imap(
                        stream,
                        log_prefix,
                        Arc::clone(&config),
                        Arc::clone(&store),
                        Arc::clone(&blobs),
                        Arc::clone(&clock),
                        Arc::clone(&ids),
                        ssl_acceptor.clone(),
                    )
                }
            },
        ));
    }

    if Protocols::Imap != protocols {
        let listener = TcpListener::bind((
            config.lmtp.host.as_str(),
            config.lmtp.port,
        ))?;
        info!(
            "LMTP listening on {}:{}",
            config.lmtp.host, config.lmtp.port,
        );
        listeners.push(spawn_accept_loop(
            listener,
            Arc::clone(&state),
            "lmtp",
            {
                let config = Arc::clone(&config);
                let store = Arc::clone(&store);
                let blobs = Arc::clone(&blobs);
                let clock = Arc::clone(&clock);
                let ids = Arc::clone(&ids);
                move |stream, log_prefix| {
                    serve_lmtp(
                        stream,
                        log_prefix,
                        Arc::clone(&config),
                        Arc::clone(&store),
                        Arc::clone(&blobs),
                        Arc::clone(&clock),
                        Arc::clone(&ids),
                    )
                }
            },
        ));
    }

    for listener in listeners {
        let _ = listener.join();
    }

    state.await_grace();
    Ok(())
}

/// An accept loop: polls the stop flag between accepts and hands each
/// connection to its own worker thread.
fn spawn_accept_loop<F>(
    listener: TcpListener,
    state: Arc<ServerState>,
    protocol: &'static str,
    handler: F,
) -> thread::JoinHandle<()>
where
    F: Fn(TcpStream, LogPrefix) -> Result<(), Error>
        + Send
        + Sync
        + 'static,
{
    let handler = Arc::new(handler);

    thread::spawn(move || {
        listener
            .set_nonblocking(true)
            .expect("cannot poll listener");

        while !state.stopping() {
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e)
                    if std::io::ErrorKind::WouldBlock == e.kind() =>
                {
                    thread::sleep(Duration::from_millis(250));
                    continue;
                },
                Err(e) => {
                    error!("{} accept failed: {}", protocol, e);
                    continue;
                },
            };

            if stream.set_nonblocking(false).is_err() {
                continue;
            }

            let log_prefix = LogPrefix::new(protocol, peer.to_string());
            info!("{} Connection accepted", log_prefix);

            state.live_sessions.fetch_add(1, Ordering::SeqCst);
            let guard_state = Arc::clone(&state);
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let _guard = SessionGuard(guard_state);
                let session_prefix = log_prefix.clone();
                match (*handler)(stream, log_prefix) {
                    Ok(()) => {
                        info!("{} Session ended", session_prefix)
                    },
                    Err(e) => {
                        info!("{} Session ended: {}", session_prefix, e)
                    },
                }
            });
        }

        info!("{} listener stopped", protocol);
    })
}

fn serve_imap(
    stream: TcpStream,
    log_prefix: LogPrefix,
    config: Arc<SystemConfig>,
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    clock: ArcClock,
    ids: ArcIdSource,
    ssl_acceptor: Option<Arc<SslAcceptor>>,
) -> Result<(), Error> {
    let mut transport = TcpTransport::new(stream);

    if config.imap.secure {
        let acceptor =
            ssl_acceptor.as_ref().ok_or(Error::TlsNotAvailable)?;
        transport.start_tls(acceptor)?;
    }

    let mut processor = imap::session::CommandProcessor::new(
        log_prefix,
        Arc::clone(&config),
        store,
        blobs,
        clock,
        ids,
    );
    processor.set_tls_active(transport.is_tls());

    imap::server::Server::new(
        Box::new(transport),
        processor,
        ssl_acceptor,
    )
    .run()
}

fn serve_lmtp(
    stream: TcpStream,
    log_prefix: LogPrefix,
    config: Arc<SystemConfig>,
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    clock: ArcClock,
    ids: ArcIdSource,
) -> Result<(), Error> {
    lmtp::server::Server::new(
        Box::new(TcpTransport::new(stream)),
        log_prefix,
        config,
        store,
        blobs,
        clock,
        ids,
    )
    .run()
}

fn create_ssl_acceptor(
    cert: &str,
    key: &str,
) -> Result<SslAcceptor, Error> {
    let mut builder =
        SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
    builder.set_private_key_file(key, SslFiletype::PEM)?;
    builder.set_certificate_chain_file(cert)?;
    builder.check_private_key()?;
    Ok(builder.build())
}
