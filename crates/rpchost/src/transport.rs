// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared TCP sockets.
//!
//! Listeners of one process serving different paths on the same `host:port`
//! share one bound socket. A connection is routed to a listener by the `to`
//! address of its first request and stays with that listener until it
//! closes.
//!
//! # Architecture
//!
//! ```text
//! accept thread (one per socket)         session thread (one per connection)
//! +------------------------------+       +-----------------------------------+
//! | mio::Poll                    |       | mio::Poll                         |
//! |  - TcpListener (accept)      | ----> |  - TcpStream (frames in/out)      |
//! |  - Waker (unbind)            |       |  - Waker (shutdown, sever)        |
//! +------------------------------+       +-----------------------------------+
//! ```
//!
//! A session is watched by every listener it may be routed to from the
//! moment it is accepted, so closing or aborting a listener reaches
//! connections that have not sent anything yet.

use crate::address::ServiceAddress;
use crate::contract::Fault;
use crate::error::{Error, Result};
use crate::listener::{Dispatcher, FAULT_ACTION};
use crate::message::{encode_frame, Frame, FrameDecoder, Message, UserNameToken};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Token for the bound listener or the session stream
const SOCKET_TOKEN: Token = Token(0);

/// Token for the waker
const WAKER_TOKEN: Token = Token(1);

/// Maximum events to process per poll
const MAX_EVENTS: usize = 64;

/// Read chunk size
const READ_CHUNK: usize = 8 * 1024;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

static SOCKETS: OnceLock<Mutex<HashMap<SocketAddr, Arc<SharedSocket>>>> = OnceLock::new();

fn sockets() -> &'static Mutex<HashMap<SocketAddr, Arc<SharedSocket>>> {
    SOCKETS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Wakes one session thread.
#[derive(Clone)]
pub(crate) struct SessionSignal {
    id: u64,
    waker: Arc<Waker>,
    severed: Arc<AtomicBool>,
}

impl SessionSignal {
    fn new(waker: Waker) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            waker: Arc::new(waker),
            severed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn notify(&self) {
        if let Err(e) = self.waker.wake() {
            tracing::trace!("Session {} wake failed: {}", self.id, e);
        }
    }

    fn sever(&self) {
        self.severed.store(true, Ordering::Release);
        self.notify();
    }

    fn is_severed(&self) -> bool {
        self.severed.load(Ordering::Acquire)
    }
}

/// Sessions of one listener.
///
/// Unrouted sessions are watched so shutdown reaches them. Admitted
/// sessions count against the session limit.
#[derive(Default)]
pub(crate) struct Connections {
    pending: DashMap<u64, SessionSignal>,
    admitted: DashMap<u64, SessionSignal>,
    active: Mutex<usize>,
    drained: Condvar,
}

impl Connections {
    fn watch(&self, signal: &SessionSignal) {
        self.pending.insert(signal.id, signal.clone());
    }

    fn unwatch(&self, id: u64) {
        self.pending.remove(&id);
    }

    /// Count `signal` as an active session unless `limit` is reached.
    fn admit(&self, signal: &SessionSignal, limit: usize) -> bool {
        let mut active = self.active.lock();
        self.pending.remove(&signal.id);
        if *active >= limit {
            return false;
        }
        *active += 1;
        self.admitted.insert(signal.id, signal.clone());
        true
    }

    fn release(&self, id: u64) {
        let mut active = self.active.lock();
        if self.admitted.remove(&id).is_some() {
            *active = active.saturating_sub(1);
        }
        if *active == 0 {
            self.drained.notify_all();
        }
    }

    pub(crate) fn count(&self) -> usize {
        *self.active.lock()
    }

    /// Wait until no session is left. `false` on timeout.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut active = self.active.lock();
        while *active > 0 {
            if self.drained.wait_until(&mut active, deadline).timed_out() {
                return *active == 0;
            }
        }
        true
    }

    /// Wake every session so it sees the listener shutting down.
    pub(crate) fn notify_all(&self) {
        for entry in self.pending.iter() {
            entry.value().notify();
        }
        for entry in self.admitted.iter() {
            entry.value().notify();
        }
    }

    /// Drop admitted sessions without waiting.
    pub(crate) fn sever(&self) {
        for entry in self.admitted.iter() {
            entry.value().sever();
        }
        for entry in self.pending.iter() {
            entry.value().notify();
        }
    }
}

/// Frame limits of one route.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RouteSettings {
    pub max_message_size: usize,
    pub receive_timeout: Duration,
}

/// The endpoints of one listener reachable through a shared socket.
pub(crate) struct Route {
    pub listener: u64,
    pub paths: Vec<String>,
    pub slots: Vec<usize>,
    pub settings: RouteSettings,
    pub dispatcher: Arc<Dispatcher>,
    pub connections: Arc<Connections>,
    pub shutdown: Arc<AtomicBool>,
    pub max_sessions: usize,
}

impl Route {
    fn serves(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Live route for `to`, the first live route when `to` is absent.
fn route_for(routes: &[Arc<Route>], to: Option<&str>) -> Option<Arc<Route>> {
    let mut live = routes.iter().filter(|r| !r.is_shut_down());
    match to.and_then(|t| ServiceAddress::parse(t).ok()) {
        Some(addr) => live.find(|r| r.serves(addr.path())).cloned(),
        None => live.next().cloned(),
    }
}

fn first_frame_limits(routes: &[Arc<Route>]) -> RouteSettings {
    routes.iter().fold(
        RouteSettings {
            max_message_size: 0,
            receive_timeout: Duration::ZERO,
        },
        |acc, r| RouteSettings {
            max_message_size: acc.max_message_size.max(r.settings.max_message_size),
            receive_timeout: acc.receive_timeout.max(r.settings.receive_timeout),
        },
    )
}

/// A bound socket and the routes served through it.
pub(crate) struct SharedSocket {
    key: SocketAddr,
    local: SocketAddr,
    routes: ArcSwap<Vec<Arc<Route>>>,
    shutdown: AtomicBool,
    waker: Waker,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl SharedSocket {
    /// Serve `route` on `addr`, binding the socket if no listener has yet.
    ///
    /// Port 0 always binds a fresh socket.
    pub(crate) fn attach(addr: SocketAddr, route: Route) -> Result<Arc<SharedSocket>> {
        let mut registry = sockets().lock();

        if addr.port() != 0 {
            if let Some(socket) = registry.get(&addr) {
                socket.add_route(route)?;
                return Ok(Arc::clone(socket));
            }
        }

        let mut listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        let key = if addr.port() == 0 { local } else { addr };

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, SOCKET_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        let socket = Arc::new(SharedSocket {
            key,
            local,
            routes: ArcSwap::from_pointee(vec![Arc::new(route)]),
            shutdown: AtomicBool::new(false),
            waker,
            acceptor: Mutex::new(None),
        });

        let accepting = Arc::clone(&socket);
        let handle = std::thread::Builder::new()
            .name(format!("rpchost-accept-{}", local.port()))
            .spawn(move || accepting.accept_loop(poll, listener))?;
        *socket.acceptor.lock() = Some(handle);

        registry.insert(key, Arc::clone(&socket));
        tracing::debug!("Bound {}", local);
        Ok(socket)
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn add_route(&self, route: Route) -> Result<()> {
        let routes = self.routes.load();
        if let Some(path) = route
            .paths
            .iter()
            .find(|p| routes.iter().any(|r| r.serves(p)))
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{}{} is already served by another listener", self.local, path),
            )));
        }
        let route = Arc::new(route);
        self.routes.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&route));
            next
        });
        Ok(())
    }

    /// Stop serving `listener`. The last route out unbinds the socket.
    pub(crate) fn detach(self: &Arc<Self>, listener: u64) {
        let mut registry = sockets().lock();
        self.routes.rcu(|current| {
            current
                .iter()
                .filter(|r| r.listener != listener)
                .cloned()
                .collect::<Vec<_>>()
        });
        if !self.routes.load().is_empty() {
            return;
        }

        self.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            tracing::warn!("Failed to wake accept thread for {}: {}", self.local, e);
        }
        if registry
            .get(&self.key)
            .is_some_and(|s| Arc::ptr_eq(s, self))
        {
            registry.remove(&self.key);
        }
        // Joined under the registry lock so the port is free once we return.
        if let Some(handle) = self.acceptor.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Accept thread for {} panicked", self.local);
            }
        }
        drop(registry);
        tracing::debug!("Unbound {}", self.local);
    }

    fn accept_loop(self: Arc<Self>, mut poll: Poll, listener: TcpListener) {
        let mut events = Events::with_capacity(MAX_EVENTS);

        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!("Poll failed on {}: {}", self.local, e);
                break;
            }

            for event in events.iter() {
                if event.token() == SOCKET_TOKEN {
                    self.accept_pending(&listener);
                }
            }
        }
    }

    fn accept_pending(self: &Arc<Self>, listener: &TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => self.start_session(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Accept failed on {}: {}", self.local, e);
                    break;
                }
            }
        }
    }

    fn start_session(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let session = match Session::new(stream, peer) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Failed to set up session for {}: {}", peer, e);
                return;
            }
        };

        let candidates: Vec<Arc<Route>> = self.routes.load().iter().cloned().collect();
        let signal = session.signal.clone();
        for route in &candidates {
            route.connections.watch(&signal);
        }

        let socket = Arc::clone(self);
        let watched = candidates.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("rpchost-session-{}", peer))
            .spawn(move || socket.serve(session, candidates));
        if let Err(e) = spawned {
            tracing::warn!("Failed to start session for {}: {}", peer, e);
            for route in &watched {
                route.connections.unwatch(signal.id);
            }
        }
    }

    fn serve(&self, mut session: Session, candidates: Vec<Arc<Route>>) {
        let peer = session.peer;
        let signal = session.signal.clone();
        tracing::debug!("Session opened: {} on {}", peer, self.local);

        let limits = first_frame_limits(&candidates);
        let first = session.next_request(limits, || {
            self.shutdown.load(Ordering::Acquire) || candidates.iter().all(|r| r.is_shut_down())
        });
        let route = first
            .as_ref()
            .and_then(|(message, _)| route_for(&candidates, message.to.as_deref()));
        for other in &candidates {
            if !route.as_ref().is_some_and(|r| Arc::ptr_eq(r, other)) {
                other.connections.unwatch(signal.id);
            }
        }

        let Some(first) = first else {
            session.close();
            return;
        };
        let Some(route) = route else {
            let to = first.0.to.unwrap_or_default();
            tracing::debug!("Session {}: no listener at '{}'", peer, to);
            let fault = Fault::sender(format!("No endpoint listening at '{}'", to));
            let reply = Frame::Reply {
                message: Message::fault(FAULT_ACTION, fault),
            };
            let _ = session.write_frame(&reply, limits.max_message_size);
            session.close();
            return;
        };

        if !route.connections.admit(&signal, route.max_sessions) {
            tracing::warn!(
                "Session limit {} reached, dropping {}",
                route.max_sessions,
                peer
            );
            session.close();
            return;
        }
        // Admitted after a close or abort that already swept the sessions.
        if route.is_shut_down() {
            route.connections.release(signal.id);
            session.close();
            return;
        }

        let stop = || {
            self.shutdown.load(Ordering::Acquire) || route.is_shut_down() || signal.is_severed()
        };
        let mut pending = Some(first);
        loop {
            let request = match pending.take() {
                Some(request) => request,
                None => match session.next_request(route.settings, stop) {
                    Some(request) => request,
                    None => break,
                },
            };

            let (message, credentials) = request;
            let reply = route.dispatcher.dispatch(
                self.local,
                &route.slots,
                message,
                credentials.as_ref(),
            );
            if let Some(reply) = reply {
                if signal.is_severed() {
                    break;
                }
                let frame = Frame::Reply { message: reply };
                if let Err(e) = session.write_frame(&frame, route.settings.max_message_size) {
                    tracing::warn!("Session {}: failed to send reply: {}", peer, e);
                    break;
                }
            }
        }

        route.connections.release(signal.id);
        session.close();
        tracing::debug!("Session closed: {}", peer);
    }
}

type Request = (Message, Option<UserNameToken>);

/// One accepted connection, driven by its own poll.
struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    poll: Poll,
    events: Events,
    signal: SessionSignal,
    decoder: FrameDecoder,
    open: bool,
}

impl Session {
    fn new(mut stream: TcpStream, peer: SocketAddr) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry().register(
            &mut stream,
            SOCKET_TOKEN,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let _ = stream.set_nodelay(true);
        Ok(Self {
            stream,
            peer,
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            signal: SessionSignal::new(waker),
            decoder: FrameDecoder::new(0),
            open: true,
        })
    }

    /// Wait for and read the next request frame.
    ///
    /// `None` once `stop` holds, on idle timeout, end of stream or a bad frame.
    fn next_request(&mut self, settings: RouteSettings, stop: impl Fn() -> bool) -> Option<Request> {
        self.decoder.set_max_message_size(settings.max_message_size);
        let deadline = Instant::now() + settings.receive_timeout;
        loop {
            if stop() {
                return None;
            }
            // Read before every poll: edges consumed while writing are not repeated.
            if self.open {
                match self.fill() {
                    Ok(open) => self.open = open,
                    Err(e) => {
                        tracing::debug!("Session {} error: {}", self.peer, e);
                        return None;
                    }
                }
            }
            match self.decoder.decode() {
                Ok(Some(Frame::Request {
                    message,
                    credentials,
                })) => return Some((message, credentials)),
                Ok(Some(Frame::Reply { .. })) => {
                    tracing::warn!("Session {}: unexpected reply frame", self.peer);
                    return None;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Session {}: {}", self.peer, e);
                    return None;
                }
            }
            if !self.open {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("Session {} idle for {:?}", self.peer, settings.receive_timeout);
                return None;
            }
            if let Err(e) = self.poll.poll(&mut self.events, Some(deadline - now)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    tracing::debug!("Session {} poll error: {}", self.peer, e);
                    return None;
                }
            }
        }
    }

    /// Read what is available, stopping early once a frame is complete.
    /// `Ok(false)` at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.decoder.feed(&chunk[..n]);
                    if self.decoder.is_ready() {
                        return Ok(true);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn write_frame(&mut self, frame: &Frame, max_message_size: usize) -> Result<()> {
        let bytes = encode_frame(frame, max_message_size)?;
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait_writable()?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Block until the stream accepts more bytes or the session is severed.
    fn wait_writable(&mut self) -> io::Result<()> {
        loop {
            if self.signal.is_severed() {
                return Err(io::Error::from(io::ErrorKind::ConnectionAborted));
            }
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            let ready = self.events.iter().any(|e| {
                e.token() == SOCKET_TOKEN && (e.is_writable() || e.is_write_closed() || e.is_error())
            });
            if ready {
                return Ok(());
            }
        }
    }

    fn close(&mut self) {
        let _ = self.poll.registry().deregister(&mut self.stream);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
