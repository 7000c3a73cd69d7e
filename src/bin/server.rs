//! mcp-apps demo server
//!
//! Run with: mcp-apps-server --port 3000

use std::sync::Arc;

use clap::Parser;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_apps::{
    AppConfig, CspPolicy, DisplayMode, McpApp, ResourceConfig, ToolConfig, ToolContext, ToolResult,
};

#[derive(Parser, Debug)]
#[command(name = "mcp-apps-server")]
#[command(about = "Demo MCP Apps server with a notes panel and a live counter")]
struct Args {
    /// HTTP port
    #[arg(long, env = "MCP_PORT")]
    port: Option<u16>,

    /// Public base URL used for websocket URLs
    #[arg(long, env = "MCP_PUBLIC_URL")]
    public_url: Option<String>,

    /// Frontend dev server port (enables HMR injection with --dev)
    #[arg(long, env = "MCP_DEV_SERVER_PORT")]
    dev_server_port: Option<u16>,

    /// Development mode
    #[arg(long)]
    dev: bool,

    /// Bound for each shutdown phase in ms
    #[arg(long, env = "MCP_GRACEFUL_SHUTDOWN_MS")]
    graceful_shutdown_ms: Option<u64>,

    /// Identity endpoint for `whoami`
    #[arg(long, env = "MCP_IDENTITY_URL")]
    identity_url: Option<String>,
}

const NOTES_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Notes</title></head>
<body>
<ul id="notes"></ul>
<script>
  const data = window.openai?.toolOutput ?? {};
  for (const note of data.notes ?? []) {
    const li = document.createElement("li");
    li.textContent = note;
    document.getElementById("notes").appendChild(li);
  }
</script>
</body>
</html>"#;

const COUNTER_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Counter</title></head>
<body>
<h1 id="count">0</h1>
<button id="inc">+1</button>
<script>
  const data = window.openai?.toolOutput ?? {};
  const label = document.getElementById("count");
  label.textContent = data.count ?? 0;
  if (data.websocketUrl) {
    const ws = new WebSocket(data.websocketUrl);
    ws.onmessage = (e) => { label.textContent = JSON.parse(e.data).count; };
    document.getElementById("inc").onclick = () => ws.send(JSON.stringify({ action: "increment" }));
  }
</script>
</body>
</html>"#;

const NOTES_ICON: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 16 16"><rect x="2" y="1" width="12" height="14" rx="2"/></svg>"#;

#[derive(Debug, Deserialize, JsonSchema)]
struct OpenNotesInput {
    /// Note to append before opening the panel
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct StartCounterInput {
    /// Initial value
    #[serde(default)]
    start: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Counter {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct CounterMessage {
    action: String,
}

fn register_notes(app: &McpApp) -> anyhow::Result<()> {
    app.resource(
        ResourceConfig::new("Notes", "ui://notes/panel")
            .description("Shared notes panel")
            .html(NOTES_HTML)
            .icon_svg(NOTES_ICON)
            .display_modes([DisplayMode::Inline, DisplayMode::Fullscreen])
            .prefers_border(true),
    )?;

    app.tool(
        ToolConfig::new("open_notes", "Open the notes panel, optionally adding a note")
            .title("Open notes")
            .ui("ui://notes/panel")
            .invoking("Opening notes")
            .invoked("Notes ready"),
        |input: OpenNotesInput, ctx: ToolContext| async move {
            let mut notes: Vec<String> = ctx.get_state().await.unwrap_or_default();
            if let Some(note) = input.note {
                notes.push(note);
            }
            ctx.set_state(&notes).await?;
            Ok::<_, anyhow::Error>(
                ToolResult::data(json!({ "notes": notes }))
                    .with_title("Notes")
                    .with_inline_height(320),
            )
        },
    );

    app.tool_untyped(
        ToolConfig::new("list_notes", "List saved notes as text")
            .ui("ui://notes/panel")
            .read_only(true),
        None,
        |_args: Value, ctx: ToolContext| async move {
            let notes: Vec<String> = ctx.get_state().await.unwrap_or_default();
            let text = if notes.is_empty() {
                "No notes yet".to_string()
            } else {
                notes.join("\n")
            };
            Ok::<_, anyhow::Error>(
                ToolResult::data(json!({ "notes": notes }))
                    .with_text(text)
                    .no_widget(),
            )
        },
    );
    Ok(())
}

fn register_counter(app: &McpApp) -> anyhow::Result<()> {
    app.resource(
        ResourceConfig::new("Live counter", "ui://counter/live")
            .description("Counter synced over a websocket")
            .html(COUNTER_HTML)
            .csp(CspPolicy::default().connect("ws://localhost"))
            .multi_instance(true)
            .websocket(true),
    )?;

    app.tool(
        ToolConfig::new("start_counter", "Start a live counter")
            .ui("ui://counter/live")
            .preferred_display_mode(DisplayMode::Pip),
        |input: StartCounterInput, ctx: ToolContext| async move {
            let counter = Counter { count: input.start };
            ctx.set_state(&counter).await?;

            let handler_ctx = ctx.clone();
            ctx.on_message(move |message| {
                let parsed: Result<CounterMessage, _> = serde_json::from_value(message);
                if !matches!(parsed, Ok(ref m) if m.action == "increment") {
                    return;
                }
                let ctx = handler_ctx.clone();
                tokio::spawn(async move {
                    let mut counter: Counter = ctx.get_state().await.unwrap_or_default();
                    counter.count += 1;
                    if let Err(e) = ctx.set_state(&counter).await {
                        tracing::error!("Failed to store counter: {}", e);
                        return;
                    }
                    ctx.send(&counter).await;
                });
            });

            let greeting = ctx.clone();
            ctx.on_connect(move |client| {
                tracing::info!(client = client.id(), instance_id = ?greeting.instance_id(), "Counter client attached");
            });

            Ok::<_, anyhow::Error>(ToolResult::data(&counter).with_title("Counter"))
        },
    );
    Ok(())
}

#[cfg(feature = "identity")]
fn register_whoami(app: Arc<McpApp>) {
    let lookup = Arc::downgrade(&app);
    app.tool_untyped(
        ToolConfig::new("whoami", "Show the signed-in user"),
        None,
        move |_args: Value, ctx: ToolContext| {
            let lookup = lookup.clone();
            async move {
                let Some(app) = lookup.upgrade() else {
                    return Ok::<_, anyhow::Error>(ToolResult::error("Server shutting down"));
                };
                match app.get_identity(ctx.auth_token()).await {
                    Ok(identity) => Ok(ToolResult::data(&identity).no_widget()),
                    Err(e) => Ok(ToolResult::error(e.to_string())),
                }
            }
        },
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env("mcp-apps-demo", env!("CARGO_PKG_VERSION"));
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.public_url.is_some() {
        config.public_url = args.public_url;
    }
    if args.dev_server_port.is_some() {
        config.dev_server_port = args.dev_server_port;
    }
    config.dev_mode |= args.dev;
    if let Some(ms) = args.graceful_shutdown_ms {
        config.graceful_shutdown_ms = ms;
    }
    if args.identity_url.is_some() {
        config.identity_url = args.identity_url;
    }

    let app = Arc::new(McpApp::new(config));
    register_notes(&app)?;
    register_counter(&app)?;
    #[cfg(feature = "identity")]
    register_whoami(app.clone());

    app.on_instance_destroy(|event| {
        tracing::info!(instance_id = %event.instance_id, has_state = event.state.is_some(), "Instance destroyed");
        Ok(())
    });
    app.on_tool_error(|event| {
        tracing::warn!(tool = %event.tool, error = %event.error, "Tool failed");
    });

    let handle = app.clone().serve().await?;
    tracing::info!("Listening on http://{}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    handle.stop().await;
    Ok(())
}
