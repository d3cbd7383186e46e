//! dbgp-server
//!
//! Waits for a script engine to connect over DBGP, then drives it with
//! JSON-RPC requests read from stdin. Responses and notifications are
//! written to stdout one per line, logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use dbgp_core::breakpoint::{BreakpointManager, OutputEvent};
use dbgp_core::dbgp::{OutputMode, SessionEvent, TransportConfig};
use dbgp_core::protocol::{Notification, RpcMessage};
use dbgp_core::{Request, Response, Session, SessionConfig};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod handler;

use config::{Cli, Config};
use handler::Handler;

type Outgoing = mpsc::UnboundedSender<String>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(Cli::parse())?;

    // Logging goes to stderr; stdout is for JSON-RPC
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("dbgp-server starting...");

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    info!("Waiting for engine on {}", addr);

    let (stream, peer) = listener.accept().await.context("Failed to accept engine")?;
    stream.set_nodelay(true)?;
    info!("Engine connected from {}", peer);

    let session = Session::connect(
        stream,
        SessionConfig {
            transport: TransportConfig {
                init_timeout: config.init_timeout,
                ..TransportConfig::default()
            },
            dialect: config.dialect,
        },
    )
    .await
    .context("Engine did not complete the DBGP handshake")?;

    for result in [
        session.stdout(OutputMode::Copy).await,
        session.stderr(OutputMode::Copy).await,
    ] {
        if let Err(err) = result {
            warn!("Output redirection unavailable: {}", err);
        }
    }

    let manager = BreakpointManager::new(session.clone(), config.advanced_breakpoints);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_lines(out_rx));
    let forwarder = tokio::spawn(forward_events(
        session.subscribe(),
        manager.subscribe(),
        out_tx.clone(),
    ));

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(serve(
        Handler::new(manager, config.max_depth),
        request_rx,
        out_tx.clone(),
    ));

    let closed = session.shutdown_token();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = closed.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(l)) => l,
            Ok(None) => {
                info!("stdin closed");
                break;
            }
            Err(e) => {
                error!("Failed to read line: {}", e);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        debug!("Received: {}", line);

        // Parse JSON-RPC request
        let msg = match serde_json::from_str::<RpcMessage<Request>>(&line) {
            Ok(msg) => msg,
            Err(e) => {
                send(&out_tx, &RpcMessage::new(0, Response::error(format!("Parse error: {}", e))));
                continue;
            }
        };
        let id = msg.id.unwrap_or(0);
        match msg.content {
            // A continuation may be in flight; pause must not queue behind it.
            Request::Pause => send(&out_tx, &RpcMessage::new(id, Handler::pause(&session).await)),
            request => {
                let shutdown = matches!(request, Request::Shutdown);
                if request_tx.send((id, request)).is_err() || shutdown {
                    break;
                }
            }
        }
    }

    drop(request_tx);
    if let Err(err) = worker.await {
        error!("Request worker failed: {}", err);
    }
    session.shutdown();
    if let Err(err) = forwarder.await {
        error!("Event forwarder failed: {}", err);
    }
    drop(out_tx);
    writer.await??;

    info!("dbgp-server shutting down");
    Ok(())
}

/// Handle queued requests in order.
async fn serve(
    mut handler: Handler,
    mut requests: mpsc::UnboundedReceiver<(u64, Request)>,
    out: Outgoing,
) {
    while let Some((id, request)) = requests.recv().await {
        let response = handler.handle(request).await;
        send(&out, &RpcMessage::new(id, response));
    }
}

/// Turn log point output and engine streams into notifications until the
/// session closes, then announce termination once.
async fn forward_events(
    mut session_events: broadcast::Receiver<SessionEvent>,
    mut output: broadcast::Receiver<OutputEvent>,
    out: Outgoing,
) {
    let mut output_open = true;
    loop {
        tokio::select! {
            event = output.recv(), if output_open => match event {
                Ok(event) => send(&out, &RpcMessage::notification(Notification::Output(event))),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} output events", n),
                Err(broadcast::error::RecvError::Closed) => output_open = false,
            },
            event = session_events.recv() => match event {
                Ok(SessionEvent::Stdout(text)) => send(&out, &stream_notification("stdout", text)),
                Ok(SessionEvent::Stderr(text)) => send(&out, &stream_notification("stderr", text)),
                Ok(SessionEvent::Notify(name)) => debug!("Engine notification: {}", name),
                Ok(SessionEvent::Error(message)) => error!("Engine connection failed: {}", message),
                Ok(SessionEvent::Closed) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} engine events", n),
            },
        }
    }
    send(&out, &RpcMessage::notification(Notification::Terminated));
}

fn stream_notification(stream: &str, text: String) -> RpcMessage<Notification> {
    RpcMessage::notification(Notification::Stream {
        stream: stream.to_string(),
        text,
    })
}

fn send<T: Serialize>(out: &Outgoing, message: &T) {
    match serde_json::to_string(message) {
        Ok(json) => {
            // The writer only stops once every sender is gone.
            let _ = out.send(json);
        }
        Err(e) => error!("Failed to serialize message: {}", e),
    }
}

async fn write_lines(mut lines: mpsc::UnboundedReceiver<String>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.recv().await {
        debug!("Sending: {}", line);
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}
