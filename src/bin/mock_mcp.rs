//! Loopback MCP stand-in for exercising the gateway by hand.
//!
//! Answers JSON-RPC on `POST /mcp`, as plain JSON or as a short SSE stream
//! when the client accepts `text/event-stream`. `GET /mcp` opens a
//! server-to-client event stream that emits a tick every second.

use axum::{
    Json, Router,
    http::{HeaderMap, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use clap::Parser;
use futures_util::stream::{self, Stream};
use serde_json::{Value, json};
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(about = "Mock MCP server for local gateway testing")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "MCP_PORT", default_value_t = 18080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let app = Router::new().route("/mcp", get(event_stream).post(rpc));

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    tracing::info!(addr = %addr, "Mock MCP server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind");
        e
    })?;

    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!(error = %e, "Server error");
        e
    })?;

    Ok(())
}

async fn rpc(headers: HeaderMap, Json(request): Json<Value>) -> Response {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    tracing::info!(method = %method, "Received JSON-RPC request");

    let result = match method.as_str() {
        "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mock-mcp", "version": env!("CARGO_PKG_VERSION") },
        }),
        "tools/list" => json!({
            "tools": [{
                "name": "echo",
                "description": "Echo the arguments back",
                "inputSchema": { "type": "object" },
            }],
        }),
        "tools/call" => json!({
            "content": [{
                "type": "text",
                "text": request.pointer("/params/arguments").cloned().unwrap_or(Value::Null).to_string(),
            }],
        }),
        _ => json!({}),
    };
    let reply = json!({ "jsonrpc": "2.0", "id": id, "result": result });

    let wants_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));

    if wants_sse {
        // A progress notification, then the reply.
        let events = vec![
            json!({ "jsonrpc": "2.0", "method": "notifications/progress", "params": { "progress": 1 } }),
            reply,
        ];
        let stream = stream::unfold(events.into_iter(), |mut it| async move {
            let next = it.next()?;
            sleep(Duration::from_millis(50)).await;
            Some((Ok::<_, Infallible>(Event::default().data(next.to_string())), it))
        });
        Sse::new(stream).into_response()
    } else {
        Json(reply).into_response()
    }
}

async fn event_stream() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = stream::unfold(0u64, |i| async move {
        sleep(Duration::from_secs(1)).await;
        let data = json!({ "jsonrpc": "2.0", "method": "notifications/tick", "params": { "seq": i } });
        Some((Ok(Event::default().data(data.to_string())), i + 1))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
