//! Administrative TCP console: newline-delimited commands, one session
//! per connection.

use crate::BotContext;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const PROMPT: &str = "λ ikura$ ";

/// Listens on `global.console_port` until shutdown; a port of zero
/// disables the console entirely.
pub async fn run(ctx: BotContext) {
    let port = ctx.config.global.console_port;
    if port == 0 {
        return;
    }

    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::warn!(target: "console", %error, port, "could not bind console port");
            return;
        }
    };

    tracing::info!(target: "console", port, "starting console");
    let mut shutdown = ctx.shutdown_rx();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(target: "console", %peer, "started session");
                        tokio::spawn(session(ctx.clone(), stream));
                    }
                    Err(error) => {
                        tracing::warn!(target: "console", %error, "accept failed");
                    }
                }
            }
        }
    }

    tracing::info!(target: "console", "console exited");
}

async fn session(ctx: BotContext, stream: TcpStream) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut shutdown = ctx.shutdown_rx();

    if writer.write_all(PROMPT.as_bytes()).await.is_err() {
        return;
    }

    // partial lines accumulate inside the buffered reader until the
    // newline arrives
    let mut line = String::new();
    loop {
        line.clear();

        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }

                match line.trim() {
                    "exit" | "q" => break,

                    "stop" => {
                        tracing::info!(target: "console", "stop requested");
                        ctx.request_shutdown();
                        break;
                    }

                    "" => {
                        if writer.write_all(PROMPT.as_bytes()).await.is_err() {
                            break;
                        }
                    }

                    other => {
                        let echo = format!("command: {other}\n{PROMPT}");
                        if writer.write_all(echo.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::info!(target: "console", "session closed");
}
