use std::{
    collections::VecDeque,
    fmt, io,
    net::{SocketAddr, TcpListener},
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use actix_web::dev::{Server as ActixServer, ServerHandle as ActixHandle};
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    configuration::{RequestSettings, Settings},
    response::ResponseError,
};

/// Chooses the port a [`ServerHandle`] listens on each time it binds.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self) -> u16;
}

/// Lets the OS pick a free port; the bound port is read back after listening.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ephemeral;

impl PortAllocator for Ephemeral {
    fn allocate(&self) -> u16 {
        0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Fixed(pub u16);

impl PortAllocator for Fixed {
    fn allocate(&self) -> u16 {
        self.0
    }
}

/// Hands out increasing ports, one per listen.
#[derive(Debug)]
pub struct Sequential(AtomicU16);

impl Sequential {
    pub fn starting_at(port: u16) -> Self {
        Self(AtomicU16::new(port))
    }
}

impl PortAllocator for Sequential {
    fn allocate(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Starts the server under test on an already bound listener.
pub trait Serve: Send + Sync + 'static {
    fn serve(&self, listener: TcpListener) -> io::Result<ActixServer>;
}

impl<F> Serve for F
where
    F: Fn(TcpListener) -> io::Result<ActixServer> + Send + Sync + 'static,
{
    fn serve(&self, listener: TcpListener) -> io::Result<ActixServer> {
        self(listener)
    }
}

type ListenOutcome = Result<SocketAddr, Arc<io::Error>>;
type Deferred = Box<dyn FnOnce(ListenOutcome) + Send>;

enum Phase {
    Unbound,
    Binding,
    Listening {
        addr: SocketAddr,
        server: Option<ActixHandle>,
    },
}

struct Bookkeeping {
    port: Option<u16>,
    phase: Phase,
    pending: usize,
    deferred: VecDeque<Deferred>,
    retiring: Option<JoinHandle<()>>,
}

impl Bookkeeping {
    fn defer(&mut self) -> oneshot::Receiver<ListenOutcome> {
        let (tx, rx) = oneshot::channel();
        self.deferred.push_back(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        rx
    }
}

struct Inner {
    serve: Option<Box<dyn Serve>>,
    host: String,
    ports: Box<dyn PortAllocator>,
    defaults: RequestSettings,
    book: Mutex<Bookkeeping>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Bookkeeping> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A server shared by every assertion issued against it.
///
/// The server is started lazily by the first request, and requests that
/// arrive while it is still binding wait in FIFO order. Once the last
/// pending request finishes, the server is stopped again, and the next
/// request starts it from scratch.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<Inner>,
}

enum Next {
    Ready(SocketAddr),
    Wait(oneshot::Receiver<ListenOutcome>),
    Listen(u16, Option<JoinHandle<()>>, oneshot::Receiver<ListenOutcome>),
}

impl ServerHandle {
    pub fn new(serve: impl Serve) -> Self {
        Self::with_ports(serve, Ephemeral)
    }

    pub fn with_ports(serve: impl Serve, ports: impl PortAllocator + 'static) -> Self {
        Self::build(
            Some(Box::new(serve)),
            "127.0.0.1".into(),
            Box::new(ports),
            RequestSettings::default(),
            Phase::Unbound,
        )
    }

    pub fn with_settings(serve: impl Serve, settings: &Settings) -> Self {
        Self::build(
            Some(Box::new(serve)),
            settings.server.host.clone(),
            settings.server.port_allocator(),
            settings.request.clone(),
            Phase::Unbound,
        )
    }

    /// A server that is already running elsewhere. It is never bound or
    /// closed by the handle.
    pub fn external(addr: SocketAddr) -> Self {
        Self::build(
            None,
            addr.ip().to_string(),
            Box::new(Fixed(addr.port())),
            RequestSettings::default(),
            Phase::Listening { addr, server: None },
        )
    }

    fn build(
        serve: Option<Box<dyn Serve>>,
        host: String,
        ports: Box<dyn PortAllocator>,
        defaults: RequestSettings,
        phase: Phase,
    ) -> Self {
        let port = match &phase {
            Phase::Listening { addr, .. } => Some(addr.port()),
            _ => None,
        };
        let book = Bookkeeping {
            port,
            phase,
            pending: 0,
            deferred: VecDeque::new(),
            retiring: None,
        };
        Self {
            inner: Arc::new(Inner {
                serve,
                host,
                ports,
                defaults,
                book: Mutex::new(book),
            }),
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::Listening { .. })
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.lock().port
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        match self.inner.lock().phase {
            Phase::Listening { addr, .. } => Some(addr),
            _ => None,
        }
    }

    pub(crate) fn defaults(&self) -> &RequestSettings {
        &self.inner.defaults
    }

    /// Counts one more pending request and resolves once the server is
    /// listening. The count is released when the returned lease is dropped.
    pub(crate) async fn acquire(&self) -> Result<Lease, ResponseError> {
        let next = {
            let mut guard = self.inner.lock();
            let book = &mut *guard;
            book.pending += 1;
            match book.phase {
                Phase::Listening { addr, .. } => Next::Ready(addr),
                Phase::Binding => Next::Wait(book.defer()),
                Phase::Unbound => {
                    let port = self.inner.ports.allocate();
                    book.phase = Phase::Binding;
                    book.port = Some(port);
                    let retiring = book.retiring.take();
                    Next::Listen(port, retiring, book.defer())
                }
            }
        };
        let guard = PendingGuard(self.clone());

        let waiter = match next {
            Next::Ready(addr) => return Ok(Lease { addr, _guard: guard }),
            Next::Wait(waiter) => {
                tracing::debug!("Server is binding, deferring request");
                waiter
            }
            Next::Listen(port, retiring, waiter) => {
                tracing::debug!(port, "Binding server");
                tokio::spawn(self.clone().listen(port, retiring));
                waiter
            }
        };
        let addr = waiter
            .await
            .map_err(|_| {
                ResponseError::Listen(Arc::new(io::Error::new(
                    io::ErrorKind::Other,
                    "Server stopped binding before it was listening",
                )))
            })?
            .map_err(ResponseError::Listen)?;
        Ok(Lease { addr, _guard: guard })
    }

    async fn listen(self, port: u16, retiring: Option<JoinHandle<()>>) {
        if let Some(retiring) = retiring {
            let _ = retiring.await;
        }
        let outcome = self
            .bind(port)
            .await
            .map(|(addr, server)| (addr, Some(server)));
        self.complete_binding(outcome);
    }

    async fn bind(&self, port: u16) -> io::Result<(SocketAddr, ActixHandle)> {
        let serve = self.inner.serve.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "External server cannot be bound")
        })?;
        let listener = tokio::net::TcpListener::bind((self.inner.host.as_str(), port)).await?;
        let addr = listener.local_addr()?;
        let server = serve.serve(listener.into_std()?)?;
        let handle = server.handle();
        tokio::spawn(server);
        Ok((addr, handle))
    }

    /// Leaves the binding phase and runs every deferred action, oldest first.
    fn complete_binding(&self, outcome: io::Result<(SocketAddr, Option<ActixHandle>)>) {
        let (deferred, outcome) = {
            let mut guard = self.inner.lock();
            let book = &mut *guard;
            let outcome = match outcome {
                Ok((addr, server)) => {
                    tracing::info!(%addr, "Server is listening");
                    book.port = Some(addr.port());
                    book.phase = Phase::Listening { addr, server };
                    Ok(addr)
                }
                Err(e) => {
                    tracing::error!(error.message = %e, "Failed to start server");
                    book.port = None;
                    book.phase = Phase::Unbound;
                    Err(Arc::new(e))
                }
            };
            if book.pending == 0 {
                self.retire(book);
            }
            (std::mem::take(&mut book.deferred), outcome)
        };
        for action in deferred {
            action(outcome.clone());
        }
    }

    fn release(&self) {
        let mut guard = self.inner.lock();
        let book = &mut *guard;
        debug_assert!(book.pending > 0, "pending count released twice");
        book.pending = book.pending.saturating_sub(1);
        if book.pending == 0 {
            self.retire(book);
        }
    }

    /// Marks an owned, listening server as unbound and stops it. A later
    /// listen waits for the stop to finish.
    fn retire(&self, book: &mut Bookkeeping) {
        if self.inner.serve.is_none() || !matches!(book.phase, Phase::Listening { .. }) {
            return;
        }
        if let Phase::Listening { addr, server } = std::mem::replace(&mut book.phase, Phase::Unbound)
        {
            tracing::info!(%addr, "No pending requests, closing server");
            book.port = None;
            if let Some(server) = server {
                let stopping = server.stop(false);
                book.retiring = tokio::runtime::Handle::try_current()
                    .ok()
                    .map(|rt| rt.spawn(stopping));
            }
        }
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let book = self.inner.lock();
        f.debug_struct("ServerHandle")
            .field("host", &self.inner.host)
            .field("port", &book.port)
            .field("listening", &matches!(book.phase, Phase::Listening { .. }))
            .field("pending", &book.pending)
            .field("deferred", &book.deferred.len())
            .finish()
    }
}

struct PendingGuard(ServerHandle);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// One pending request against a listening server.
pub(crate) struct Lease {
    addr: SocketAddr,
    _guard: PendingGuard,
}

impl Lease {
    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }
}
