//! `rw-bridge client`: a line-oriented terminal front end.

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite;

use crate::ws::{Notification, ServerMessage};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(clap::Args)]
pub struct ClientArgs {
    /// Bridge URL, e.g. ws://127.0.0.1:8765
    pub url: String,

    /// What to do once connected
    #[arg(value_enum)]
    pub mode: ClientMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ClientMode {
    /// Print every stored message and exit
    Read,
    /// Hold the writer lease and send stdin lines (`exit` to stop)
    Write,
    /// Print broadcasts as they arrive
    Listen,
}

/// Any frame the bridge sends
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Broadcast(Notification),
    Reply(ServerMessage),
}

fn render(incoming: &Incoming) -> String {
    match incoming {
        Incoming::Broadcast(Notification::Broadcast { payload }) => {
            format!("[{}] {}", payload.timestamp, payload.message)
        }
        Incoming::Reply(ServerMessage::Ok {
            data: Some(text), ..
        })
        | Incoming::Reply(ServerMessage::Ok {
            reply: Some(text), ..
        }) => text.trim_end().to_string(),
        Incoming::Reply(ServerMessage::Ok { .. }) => "ok".to_string(),
        Incoming::Reply(ServerMessage::Error { message }) => format!("error: {}", message),
    }
}

fn parse(text: &str) -> Option<Incoming> {
    serde_json::from_str(text).ok()
}

pub async fn client_command(args: ClientArgs) -> Result<()> {
    let (mut ws, _) = tokio_tungstenite::connect_async(&args.url)
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;

    match args.mode {
        ClientMode::Read => {
            send_json(&mut ws, serde_json::json!({"role": "reader"})).await?;
            let reply = next_reply(&mut ws).await?;
            println!("{}", render(&Incoming::Reply(reply)));
        }
        ClientMode::Listen => {
            while let Some(incoming) = next_frame(&mut ws).await? {
                println!("{}", render(&incoming));
            }
        }
        ClientMode::Write => write_loop(&mut ws).await?,
    }

    let _ = ws.close(None).await;
    Ok(())
}

async fn write_loop(ws: &mut WsStream) -> Result<()> {
    send_json(ws, serde_json::json!({"role": "writer", "control": "start"})).await?;
    let reply = next_reply(ws).await?;
    let failed = reply.is_error();
    println!("{}", render(&Incoming::Reply(reply)));
    if failed {
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.context("Failed to read stdin")?;
                match line.as_deref().map(str::trim) {
                    None | Some("exit") => {
                        send_json(ws, serde_json::json!({"role": "writer", "control": "stop"})).await?;
                        let reply = next_reply(ws).await?;
                        println!("{}", render(&Incoming::Reply(reply)));
                        return Ok(());
                    }
                    Some("") => {}
                    Some(message) => {
                        send_json(ws, serde_json::json!({"role": "writer", "message": message})).await?;
                    }
                }
            }
            frame = next_frame(ws) => {
                match frame? {
                    Some(incoming) => println!("{}", render(&incoming)),
                    None => bail!("bridge closed the connection"),
                }
            }
        }
    }
}

async fn send_json(ws: &mut WsStream, value: serde_json::Value) -> Result<()> {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .context("Failed to send to bridge")
}

/// Next parseable frame, or None once the bridge closes
async fn next_frame(ws: &mut WsStream) -> Result<Option<Incoming>> {
    while let Some(msg) = ws.next().await {
        match msg.context("WebSocket error")? {
            tungstenite::Message::Text(text) => {
                if let Some(incoming) = parse(text.as_str()) {
                    return Ok(Some(incoming));
                }
            }
            tungstenite::Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

/// Skip broadcasts until the reply to our last request arrives
async fn next_reply(ws: &mut WsStream) -> Result<ServerMessage> {
    loop {
        match next_frame(ws).await? {
            Some(Incoming::Reply(reply)) => return Ok(reply),
            Some(Incoming::Broadcast(notification)) => {
                println!("{}", render(&Incoming::Broadcast(notification)));
            }
            None => bail!("bridge closed the connection"),
        }
    }
}
