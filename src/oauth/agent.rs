//! Loopback browser agent.
//!
//! Opens the system browser on the request URL and listens on the redirect
//! URI's host and port for the provider to send the browser back. The
//! first request hitting the redirect path resolves the pending redirect
//! with the full URL it carried; the caller parses it.
//!
//! - Only serves one redirect, then stops listening
//! - `error=access_denied` or no redirect before the timeout counts as the user backing out
//! - Stops early when the awaiting side is dropped

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use url::Url;

use super::awaiter::RedirectCallback;
use super::service::{AgentRequest, BrowserAgent};
use super::{AuthError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const SUCCESS_HTML: &str = "<html><body><h1>Signed in</h1>\
    <p>You can close this window and return to the application.</p></body></html>";
const FAILURE_HTML: &str = "<html><body><h1>Sign-in did not complete</h1>\
    <p>You can close this window and try again.</p></body></html>";

type Opener = Arc<dyn Fn(&Url) -> io::Result<()> + Send + Sync>;

/// [`BrowserAgent`] using the system browser and a one-shot loopback listener.
#[derive(Clone)]
pub struct LoopbackBrowserAgent {
    timeout: Duration,
    opener: Opener,
}

impl std::fmt::Debug for LoopbackBrowserAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBrowserAgent")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for LoopbackBrowserAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBrowserAgent {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            opener: Arc::new(|url: &Url| open::that(url.as_str())),
        }
    }

    /// How long to wait for the redirect before treating the flow as abandoned.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the browser launcher, e.g. to print the URL instead.
    #[must_use]
    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&Url) -> io::Result<()> + Send + Sync + 'static,
    {
        self.opener = Arc::new(opener);
        self
    }
}

#[async_trait]
impl BrowserAgent for LoopbackBrowserAgent {
    async fn present(&self, request: AgentRequest, callback: RedirectCallback<Url>) -> Result<()> {
        let host = request
            .redirect_uri
            .host_str()
            .ok_or_else(|| AuthError::agent_failed("redirect URI has no host"))?
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        let port = request
            .callback_port
            .or_else(|| request.redirect_uri.port_or_known_default())
            .ok_or_else(|| AuthError::agent_failed("redirect URI has no port"))?;

        let listener = TcpListener::bind((host.as_str(), port)).await.map_err(|e| {
            AuthError::agent_failed(format!("cannot listen on {host}:{port}: {e}"))
        })?;
        debug!(%host, port, "Redirect listener bound");

        (self.opener)(&request.url)
            .map_err(|e| AuthError::agent_failed(format!("cannot open browser: {e}")))?;
        info!(url = %request.url.origin().ascii_serialization(), "Browser opened");

        tokio::spawn(serve_redirect(listener, request, callback, self.timeout));
        Ok(())
    }
}

/// Accept connections until the redirect arrives, the timeout passes or the
/// awaiter goes away.
async fn serve_redirect(
    listener: TcpListener,
    request: AgentRequest,
    mut callback: RedirectCallback<Url>,
    timeout: Duration,
) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = &mut deadline => {
                warn!(timeout_secs = timeout.as_secs(), "No redirect received");
                callback.cancel();
                return;
            }
            () = callback.abandoned() => {
                debug!("Redirect no longer awaited, closing listener");
                return;
            }
        };

        let mut socket = match accepted {
            Ok((socket, _)) => socket,
            Err(e) => {
                callback.resolve(Err(AuthError::agent_failed(format!("accept failed: {e}")).into()));
                return;
            }
        };

        match read_redirect(&mut socket, &request.redirect_uri).await {
            Ok(Some(url)) => {
                let denied = url
                    .query_pairs()
                    .any(|(k, v)| k == "error" && v == "access_denied");
                let failed = denied || url.query_pairs().any(|(k, _)| k == "error");
                respond(&mut socket, if failed { 400 } else { 200 }).await;

                if denied {
                    info!("User denied the authorization request");
                    callback.cancel();
                } else {
                    callback.resolve(Ok(url));
                }
                return;
            }
            // Favicon and other stray requests.
            Ok(None) => respond(&mut socket, 404).await,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed request on redirect listener");
                respond(&mut socket, 400).await;
            }
        }
    }
}

/// Read one request and return its URL if it targets the redirect path.
async fn read_redirect(socket: &mut TcpStream, redirect_uri: &Url) -> io::Result<Option<Url>> {
    let mut buffer = vec![0u8; 8192];
    let size = socket.read(&mut buffer).await?;
    if size == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty request"));
    }

    let head = String::from_utf8_lossy(&buffer[..size]);
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let (method, target) = (parts.next().unwrap_or_default(), parts.next().unwrap_or_default());
    if method != "GET" || !target.starts_with('/') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a GET request"));
    }

    let url = redirect_uri
        .join(target)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok((url.path() == redirect_uri.path()).then_some(url))
}

async fn respond(socket: &mut TcpStream, status: u16) {
    let (line, body) = match status {
        200 => ("200 OK", SUCCESS_HTML),
        404 => ("404 Not Found", ""),
        _ => ("400 Bad Request", FAILURE_HTML),
    };
    let response = format!(
        "HTTP/1.1 {line}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = socket.write_all(response.as_bytes()).await {
        debug!(error = %e, status, "Failed to write redirect listener response");
        return;
    }
    if let Err(e) = socket.shutdown().await {
        debug!(error = %e, "Failed to close redirect listener connection");
    }
}
