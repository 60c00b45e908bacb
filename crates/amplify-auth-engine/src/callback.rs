//! Loopback HTTP server for interactive login redirects.
//!
//! Each interactive login registers a callback with [`CallbackServer::create_callback`]
//! and gets a unique URL of the form `http://{host}:{port}/callback/{ID}` to
//! use as its `redirect_uri`. Any number of callbacks can be pending at once
//! on the same listener. Each one:
//!
//! - owns its own deadline timer, armed by [`Callback::start`];
//! - can be cancelled through its [`CancelHandle`];
//! - is removed from the pending map as soon as it is resolved, rejected,
//!   timed out or cancelled.
//!
//! The listener is bound on demand when the first callback is created and
//! torn down, along with any still-open sockets, once nothing is pending and
//! no request is being served.
//!
//! No HTTP framework is used: requests are parsed straight off a
//! [`tokio::net::TcpStream`].

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use ring::rand::{SecureRandom, SystemRandom};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinSet};
use url::Url;

use crate::config::{DEFAULT_INTERACTIVE_LOGIN_TIMEOUT_MS, DEFAULT_SERVER_HOST};
use crate::error::{AuthEngineError, Result};

/// Upper bound on the request head we are willing to read.
const MAX_REQUEST_BYTES: usize = 8192;

const REQUEST_ID_BYTES: usize = 16;

const CALLBACK_PATH_PREFIX: &str = "/callback/";

/// The HTML page returned to the browser after a successful login.
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Authorization Successful</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }
        .card {
            text-align: center;
            padding: 3rem;
            background: white;
            border-radius: 12px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.08);
        }
        h1 { color: #22c55e; margin-bottom: 0.5rem; }
        p { color: #666; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Authorization Successful</h1>
        <p>You can close this tab and return to your terminal.</p>
    </div>
</body>
</html>"#;

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// A redirect received on a callback URL.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    /// Id of the callback this request was routed to.
    pub request_id: String,
    /// Full request URL, as seen by the listener.
    pub url: Url,
    /// Decoded query parameters in order of appearance.
    pub query: Vec<(String, String)>,
}

impl CallbackRequest {
    /// First value of query parameter `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// What the listener writes back to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CallbackResponse {
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "text/html; charset=utf-8".into())],
            body: body.into(),
        }
    }

    pub fn success_page() -> Self {
        Self::html(200, SUCCESS_HTML)
    }

    pub fn error_page(message: &str) -> Self {
        Self::html(
            400,
            format!(
                "<!DOCTYPE html>\n<html>\n\
                 <head><meta charset=\"utf-8\"><title>Authorization Failed</title></head>\n\
                 <body>\n<h1>Authorization Failed</h1>\n<p>{}</p>\n</body>\n</html>",
                escape_html(message)
            ),
        )
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            headers: vec![("Location".into(), location.into())],
            body: String::new(),
        }
    }

    fn plain(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "text/plain; charset=utf-8".into())],
            body: body.into(),
        }
    }

    fn to_http(&self) -> String {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));
        out.push_str(&self.body);
        out
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "",
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Listener settings.
#[derive(Debug, Clone)]
pub struct CallbackServerOptions {
    pub host: String,
    /// `0` picks any free port.
    pub port: u16,
    /// Default deadline for [`Callback::start`].
    pub timeout: Duration,
}

impl Default for CallbackServerOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.into(),
            port: 0,
            timeout: Duration::from_millis(DEFAULT_INTERACTIVE_LOGIN_TIMEOUT_MS),
        }
    }
}

type Dispatch = Box<dyn FnOnce(CallbackRequest) -> BoxFuture<'static, CallbackResponse> + Send>;
type Reject = Box<dyn FnOnce(AuthEngineError) + Send>;
type Resolver<T> = Arc<Mutex<Option<oneshot::Sender<Result<T>>>>>;

struct PendingEntry {
    dispatch: Dispatch,
    reject: Reject,
    timer: Option<AbortHandle>,
}

struct ListenerHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
}

#[derive(Default)]
struct ServerState {
    listener: Option<ListenerHandle>,
    pending: HashMap<String, PendingEntry>,
    in_flight: usize,
}

struct ServerInner {
    options: CallbackServerOptions,
    state: Mutex<ServerState>,
}

/// On-demand loopback listener shared by concurrent interactive logins.
///
/// Cloning is cheap; clones share the listener and the pending map.
#[derive(Clone)]
pub struct CallbackServer {
    inner: Arc<ServerInner>,
}

impl CallbackServer {
    pub fn new(options: CallbackServerOptions) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                options,
                state: Mutex::new(ServerState::default()),
            }),
        }
    }

    pub fn options(&self) -> &CallbackServerOptions {
        &self.inner.options
    }

    /// Register a callback and make sure the listener is up.
    ///
    /// `handler` runs when the browser hits the callback URL. Its response is
    /// written back to the browser and its value resolves the future returned
    /// by [`Callback::start`]. If it fails, an HTML error page is served and
    /// the future rejects with the same error.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthEngineError::Io`] if the listener cannot bind.
    pub fn create_callback<T, F, Fut>(&self, handler: F) -> Result<Callback<T>>
    where
        T: Send + 'static,
        F: FnOnce(CallbackRequest) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(CallbackResponse, T)>> + Send + 'static,
    {
        let id = generate_request_id()?;
        let (tx, rx) = oneshot::channel();
        let resolver: Resolver<T> = Arc::new(Mutex::new(Some(tx)));

        let dispatch_resolver = Arc::clone(&resolver);
        let dispatch: Dispatch = Box::new(move |request: CallbackRequest| {
            Box::pin(async move {
                let request_id = request.request_id.clone();
                match handler(request).await {
                    Ok((response, value)) => {
                        resolve(&dispatch_resolver, Ok(value));
                        response
                    }
                    Err(e) => {
                        tracing::warn!(
                            request_id = %request_id,
                            error = %e,
                            "callback handler failed"
                        );
                        let page = CallbackResponse::error_page(&e.to_string());
                        resolve(&dispatch_resolver, Err(e));
                        page
                    }
                }
            }) as BoxFuture<'static, CallbackResponse>
        });
        let reject: Reject = Box::new(move |e| resolve(&resolver, Err(e)));

        let mut state = self.inner.lock();
        let addr = self.inner.ensure_listener(&mut state)?;
        state.pending.insert(
            id.clone(),
            PendingEntry {
                dispatch,
                reject,
                timer: None,
            },
        );
        drop(state);

        let url = format!(
            "http://{}:{}{CALLBACK_PATH_PREFIX}{id}",
            self.inner.options.host,
            addr.port()
        );
        tracing::debug!(request_id = %id, url = %url, "callback registered");

        Ok(Callback {
            server: self.clone(),
            id,
            url,
            receiver: rx,
        })
    }

    /// Reject every pending callback with [`AuthEngineError::ServerStopped`]
    /// and close the listener.
    pub fn stop(&self) {
        let (entries, listener) = {
            let mut state = self.inner.lock();
            let entries: Vec<_> = state.pending.drain().collect();
            (entries, state.listener.take())
        };

        for (id, entry) in entries {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            tracing::debug!(request_id = %id, "rejecting pending callback, server stopped");
            (entry.reject)(AuthEngineError::ServerStopped);
        }

        if let Some(listener) = listener {
            let _ = listener.shutdown.send(());
            tracing::info!(addr = %listener.addr, "callback server stopped");
        }
    }

    /// Number of callbacks still waiting for a request.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether the listener is currently bound.
    pub fn is_listening(&self) -> bool {
        self.inner.lock().listener.is_some()
    }

    /// Address of the bound listener, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().listener.as_ref().map(|l| l.addr)
    }

    fn cancel(&self, id: &str) {
        let entry = self.inner.remove_pending(id);
        if let Some(entry) = entry {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            tracing::debug!(request_id = %id, "callback cancelled");
            (entry.reject)(AuthEngineError::Cancelled);
        }
    }

    /// Fired by a callback's own timer. The timer task is not aborted here
    /// since it is the caller.
    fn expire(&self, id: &str, timeout: Duration) {
        if let Some(entry) = self.inner.remove_pending(id) {
            tracing::warn!(
                request_id = %id,
                timeout_ms = timeout.as_millis() as u64,
                "callback timed out"
            );
            (entry.reject)(AuthEngineError::AuthTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        }
    }

    fn arm_timer(&self, id: &str, timeout: Duration) {
        let server = self.clone();
        let timer_id = id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            server.expire(&timer_id, timeout);
        });

        let mut state = self.inner.lock();
        match state.pending.get_mut(id) {
            Some(entry) => {
                if let Some(previous) = entry.timer.replace(task.abort_handle()) {
                    previous.abort();
                }
            }
            // Already resolved or cancelled.
            None => task.abort(),
        }
    }
}

impl std::fmt::Debug for CallbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackServer")
            .field("options", &self.inner.options)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ServerInner {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_listener(self: &Arc<Self>, state: &mut ServerState) -> Result<SocketAddr> {
        if let Some(listener) = &state.listener {
            return Ok(listener.addr);
        }

        let std_listener =
            std::net::TcpListener::bind((self.options.host.as_str(), self.options.port))?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(accept_loop(listener, Arc::downgrade(self), shutdown_rx));

        tracing::info!(addr = %addr, "callback server listening");
        state.listener = Some(ListenerHandle {
            addr,
            shutdown: shutdown_tx,
        });
        Ok(addr)
    }

    fn remove_pending(&self, id: &str) -> Option<PendingEntry> {
        let mut state = self.lock();
        let entry = state.pending.remove(id);
        Self::teardown_if_idle(&mut state);
        entry
    }

    fn teardown_if_idle(state: &mut ServerState) {
        if !state.pending.is_empty() || state.in_flight > 0 {
            return;
        }
        if let Some(listener) = state.listener.take() {
            let _ = listener.shutdown.send(());
            tracing::info!(addr = %listener.addr, "callback server idle, listener closed");
        }
    }

    /// Claim the pending entry for `id`, counting the request as in flight.
    fn begin_request(self: &Arc<Self>, id: &str) -> Option<(Dispatch, InFlight)> {
        let mut state = self.lock();
        let entry = state.pending.remove(id)?;
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        state.in_flight += 1;
        Some((entry.dispatch, InFlight(Arc::clone(self))))
    }
}

/// Marks one request as being served; the listener stays up until dropped.
struct InFlight(Arc<ServerInner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        ServerInner::teardown_if_idle(&mut state);
    }
}

fn resolve<T>(resolver: &Resolver<T>, result: Result<T>) {
    let sender = resolver
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(result);
    }
}

fn generate_request_id() -> Result<String> {
    let mut bytes = [0u8; REQUEST_ID_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthEngineError::auth_failed("failed to generate callback id: CSPRNG error"))?;
    Ok(hex::encode_upper(bytes))
}

// ---------------------------------------------------------------------------
// Callback handle
// ---------------------------------------------------------------------------

/// A registered callback awaiting its redirect.
pub struct Callback<T> {
    server: CallbackServer,
    id: String,
    url: String,
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T: Send + 'static> Callback<T> {
    /// The URL to use as `redirect_uri`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// A handle that can cancel this callback after [`Callback::start`]
    /// consumed it.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            server: self.server.clone(),
            id: self.id.clone(),
        }
    }

    pub fn cancel(&self) {
        self.server.cancel(&self.id);
    }

    /// Arm the deadline and wait for the redirect.
    ///
    /// `timeout` defaults to the server's configured timeout.
    pub fn start(self, timeout: Option<Duration>) -> BoxFuture<'static, Result<T>> {
        let timeout = timeout.unwrap_or(self.server.inner.options.timeout);
        self.server.arm_timer(&self.id, timeout);

        let receiver = self.receiver;
        Box::pin(async move {
            match receiver.await {
                Ok(result) => result,
                // The handler was dropped mid-request by a forced stop.
                Err(_) => Err(AuthEngineError::ServerStopped),
            }
        })
    }
}

impl<T> std::fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("id", &self.id)
            .field("url", &self.url)
            .finish()
    }
}

/// Cancels one pending callback. Idempotent; a no-op once the callback has
/// settled.
#[derive(Clone)]
pub struct CancelHandle {
    server: CallbackServer,
    id: String,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.server.cancel(&self.id);
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CancelHandle").field(&self.id).finish()
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

async fn accept_loop(
    listener: TcpListener,
    server: Weak<ServerInner>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Some(server) = server.upgrade() else { break };
                    tracing::debug!(peer = %peer, "accepted callback connection");
                    connections.spawn(handle_connection(server, stream));
                }
                Err(e) => tracing::warn!(error = %e, "callback accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Force-close anything the browser kept open.
    connections.abort_all();
}

async fn handle_connection(server: Arc<ServerInner>, mut stream: TcpStream) {
    let port = match stream.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            tracing::debug!(error = %e, "callback connection has no local address");
            return;
        }
    };

    let (response, in_flight) = match read_request_head(&mut stream).await {
        Ok(head) => route(&server, &head, port).await,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read callback request");
            return;
        }
    };

    if let Err(e) = write_response(&mut stream, &response).await {
        tracing::debug!(error = %e, "failed to write callback response");
    }

    // The listener may close only once the browser has its response.
    drop(in_flight);
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn write_response(
    stream: &mut TcpStream,
    response: &CallbackResponse,
) -> std::io::Result<()> {
    stream.write_all(response.to_http().as_bytes()).await?;
    stream.flush().await
}

/// Parse the request line and hand the request to its callback.
async fn route(
    server: &Arc<ServerInner>,
    head: &str,
    port: u16,
) -> (CallbackResponse, Option<InFlight>) {
    let Some((method, target)) = parse_request_line(head) else {
        return (CallbackResponse::plain(400, "Bad Request"), None);
    };
    if method != "GET" {
        return (CallbackResponse::plain(405, "Method Not Allowed"), None);
    }

    let Ok(url) = Url::parse(&format!("http://{}:{port}{target}", server.options.host)) else {
        return (CallbackResponse::plain(400, "Bad Request"), None);
    };
    let Some(id) = url.path().strip_prefix(CALLBACK_PATH_PREFIX) else {
        return (CallbackResponse::plain(404, "Not Found"), None);
    };
    let id = id.trim_end_matches('/').to_string();

    let Some((dispatch, in_flight)) = server.begin_request(&id) else {
        tracing::debug!(request_id = %id, "request for unknown callback");
        return (CallbackResponse::plain(400, "Invalid Request ID"), None);
    };

    tracing::debug!(request_id = %id, "dispatching callback");
    let query = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let response = dispatch(CallbackRequest {
        request_id: id,
        url,
        query,
    })
    .await;

    (response, Some(in_flight))
}

fn parse_request_line(head: &str) -> Option<(&str, &str)> {
    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    target.starts_with('/').then_some((method, target))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
