use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{PortError, PortErrorKind};

use super::util::extract_ws_url;

/// Addressing for a raw CDP command.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Thin seam over the DevTools connection so session logic can be exercised
/// against scripted fakes.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, PortError>;

    fn is_alive(&self) -> bool;
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, PortError>>,
}

/// Owns one Chromium child (or an attached remote browser) and the single
/// command loop multiplexing requests over its DevTools websocket.
pub struct ChromiumTransport {
    command_tx: mpsc::Sender<ControlMessage>,
    command_deadline: Duration,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl ChromiumTransport {
    /// Launch a browser per `cfg` (or attach to `cfg.websocket_url`) and
    /// start the command loop. The transport stays bound to that one
    /// browser: if the connection dies the transport reports dead rather
    /// than relaunching, because a silent relaunch would discard the
    /// logged-in page state mid-batch.
    pub async fn start(cfg: &SessionConfig) -> Result<Self, PortError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = browser_config(cfg)?;
            launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| PortError::new(PortErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();

        let loop_task = tokio::spawn(async move {
            let result = run_loop(conn, command_rx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", ?err, "transport loop terminated with error");
            }
        });

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            command_deadline: Duration::from_millis(cfg.command_deadline_ms),
            loop_task,
            child: Mutex::new(child),
            alive,
        })
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, PortError> {
        if !self.is_alive() {
            return Err(PortError::new(PortErrorKind::PageClosed)
                .with_hint(format!("transport closed before {method}")));
        }

        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| PortError::new(PortErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(self.command_deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(PortError::new(PortErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(PortError::new(PortErrorKind::CdpIo)
                .with_hint(format!("{method} timed out"))
                .retriable(true)),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<ControlMessage>,
) -> Result<(), PortError> {
    let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, PortError>>> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                handle_command(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => {
                match message {
                    Some(Ok(Message::Response(resp))) => {
                        handle_response(resp, &mut inflight);
                    }
                    Some(Ok(Message::Event(event))) => {
                        // Events are not consumed anywhere; drain them so the
                        // stream keeps moving.
                        if let Ok(raw) = TryInto::<CdpJsonEventMessage>::try_into(event) {
                            debug!(target: "cdp-transport", method = %raw.method, "cdp event");
                        }
                    }
                    Some(Err(err)) => {
                        let port_err = map_cdp_error(err);
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(port_err.clone()));
                        }
                        return Err(port_err);
                    }
                    None => {
                        let err = PortError::new(PortErrorKind::CdpIo)
                            .with_hint("cdp connection closed");
                        for (_, sender) in inflight.drain() {
                            let _ = sender.send(Err(err.clone()));
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn handle_command(
    conn: &mut Connection<CdpEventMessage>,
    cmd: ControlMessage,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, PortError>>>,
) -> Result<(), PortError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
    };

    let method_id: MethodId = cmd.method.clone().into();
    match conn.submit_command(method_id, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.responder);
            Ok(())
        }
        Err(err) => {
            let port_err = PortError::new(PortErrorKind::CdpIo).with_hint(err.to_string());
            let _ = cmd.responder.send(Err(port_err.clone()));
            Err(port_err)
        }
    }
}

fn handle_response(
    resp: Response,
    inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, PortError>>>,
) {
    let entry = inflight.remove(&resp.id);
    let result = extract_payload(resp);

    if let Some(sender) = entry {
        let _ = sender.send(result);
    }
}

fn extract_payload(resp: Response) -> Result<Value, PortError> {
    if let Some(result) = resp.result {
        Ok(result)
    } else if let Some(error) = resp.error {
        let retriable = error.code >= 500;
        Err(PortError::new(PortErrorKind::Protocol)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(retriable))
    } else {
        Err(PortError::new(PortErrorKind::Internal).with_hint("empty cdp response"))
    }
}

fn map_cdp_error(err: CdpError) -> PortError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => PortError::new(PortErrorKind::NavTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::FrameNotFound(_) => PortError::new(PortErrorKind::Internal).with_hint(hint),
        CdpError::JavascriptException(_) => PortError::new(PortErrorKind::Protocol).with_hint(hint),
        CdpError::Serde(_) | CdpError::InvalidMessage(_, _) => {
            PortError::new(PortErrorKind::Internal).with_hint(hint)
        }
        CdpError::Ws(_)
        | CdpError::UnexpectedWsMessage(_)
        | CdpError::Io(_)
        | CdpError::Chrome(_)
        | CdpError::ChromeMessage(_)
        | CdpError::ChannelSendError(_)
        | CdpError::NoResponse
        | CdpError::LaunchExit(_, _)
        | CdpError::LaunchTimeout(_)
        | CdpError::LaunchIo(_, _)
        | CdpError::DecodeError(_)
        | CdpError::ScrollingFailed(_)
        | CdpError::NotFound
        | CdpError::Url(_) => PortError::new(PortErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

fn browser_config(cfg: &SessionConfig) -> Result<BrowserConfig, PortError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(PortError::new(PortErrorKind::LaunchFailed).with_hint(format!(
            "chrome executable not found at {} (set AUTOAPPLY_CHROME to the full path)",
            cfg.executable.display()
        )));
    }

    let profile_dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        let cwd = std::env::current_dir().map_err(|err| {
            PortError::new(PortErrorKind::Internal)
                .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
        })?;
        cwd.join(&cfg.user_data_dir)
    };

    fs::create_dir_all(&profile_dir).map_err(|err| {
        PortError::new(PortErrorKind::Internal)
            .with_hint(format!("failed to ensure user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.command_deadline_ms))
        .launch_timeout(Duration::from_secs(20));

    if !cfg.headless {
        builder = builder.with_head();
    }

    if std::env::var("AUTOAPPLY_NO_SANDBOX")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-client-side-phishing-detection",
        "--disable-component-update",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-prompt-on-repost",
        "--disable-sync",
        "--disable-blink-features=AutomationControlled",
        "--metrics-recording-only",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        "--remote-allow-origins=*",
        "--use-mock-keychain",
        "--lang=en-US",
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
        args.push("--window-size=1440,900");
    }
    builder = builder.args(args);

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    builder = builder.user_data_dir(profile_dir);

    builder.build().map_err(|err| {
        PortError::new(PortErrorKind::LaunchFailed).with_hint(format!("browser config error: {err}"))
    })
}

async fn launch_browser(config: BrowserConfig) -> Result<(Option<Child>, String), PortError> {
    let mut child = config.launch().map_err(|err| {
        PortError::new(PortErrorKind::LaunchFailed)
            .with_hint(format!("failed to launch chromium: {err}"))
    })?;

    let ws_url = extract_ws_url(&mut child).await?;

    Ok((Some(child), ws_url))
}

impl Drop for ChromiumTransport {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}
