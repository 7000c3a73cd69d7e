//! Dual-protocol wire formatting
//!
//! Every tool result, tool listing and resource read is encoded for two
//! consumers at once: generic MCP Apps hosts (`ui` metadata,
//! `text/html;profile=mcp-app`) and ChatGPT Apps (`openai/*` metadata,
//! `text/html+skybridge`). The server never knows in advance which profile the
//! host will parse, so both are always present.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};

use super::protocol::{
    ReadResourceResult, ResourceContents, ResourceDefinition, ToolAnnotations, ToolCallResult,
    ToolContent, ToolDefinition,
};
use crate::types::{ResourceConfig, ToolConfig, ToolResult};

/// MIME type for MCP Apps hosts
pub const MCP_APP_MIME_TYPE: &str = "text/html;profile=mcp-app";

/// MIME type for ChatGPT Apps hosts
pub const SKYBRIDGE_MIME_TYPE: &str = "text/html+skybridge";

/// Metadata namespace key for MCP Apps hosts
pub const UI_META_KEY: &str = "ui";

pub const WIDGET_SESSION_META_KEY: &str = "openai/widgetSessionId";
pub const WIDGET_PREFERS_BORDER_META_KEY: &str = "openai/widgetPrefersBorder";
pub const WIDGET_DESCRIPTION_META_KEY: &str = "openai/widgetDescription";
pub const OUTPUT_TEMPLATE_META_KEY: &str = "openai/outputTemplate";
pub const WIDGET_ACCESSIBLE_META_KEY: &str = "openai/widgetAccessible";
pub const VISIBILITY_META_KEY: &str = "openai/visibility";
pub const INVOKING_META_KEY: &str = "openai/toolInvocation/invoking";
pub const INVOKED_META_KEY: &str = "openai/toolInvocation/invoked";

/// Text block for a result: `text`, else JSON of `data`, else `{}`
fn result_text(result: &ToolResult) -> String {
    if let Some(ref text) = result.text {
        return text.clone();
    }
    match result.data {
        Some(ref data) => serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string()),
        None => "{}".to_string(),
    }
}

/// Convert a handler result into the tool call wire shape
///
/// Never fails. With `no_widget` set, neither instance nor websocket
/// information is injected.
pub fn format_tool_result(
    result: &ToolResult,
    instance_id: Option<&str>,
    websocket_url: Option<&str>,
) -> ToolCallResult {
    let content = vec![ToolContent::Text {
        text: result_text(result),
    }];
    let is_error = if result.is_error { Some(true) } else { None };

    if result.no_widget {
        return ToolCallResult {
            content,
            structured_content: result.data.clone(),
            is_error,
            meta: None,
        };
    }

    let mut structured = match result.data {
        Some(Value::Object(ref map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(ref other) => {
            let mut map = Map::new();
            map.insert("data".to_string(), other.clone());
            map
        }
    };
    if let Some(ref title) = result.title {
        structured.insert("title".to_string(), json!(title));
    }
    if let Some(height) = result.inline_height {
        structured.insert("inlineHeight".to_string(), json!(height));
    }
    if let Some(id) = instance_id {
        structured.insert("instanceId".to_string(), json!(id));
    }
    if let Some(url) = websocket_url {
        structured.insert("websocketUrl".to_string(), json!(url));
    }

    let meta = instance_id.map(|id| json!({ WIDGET_SESSION_META_KEY: id }));

    ToolCallResult {
        content,
        structured_content: if structured.is_empty() {
            None
        } else {
            Some(Value::Object(structured))
        },
        is_error,
        meta,
    }
}

/// Encode an SVG icon as a data URI
pub fn icon_data_uri(svg: &str) -> String {
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

/// `_meta` block of the MCP Apps content entry
fn mcp_app_meta(config: &ResourceConfig) -> Value {
    let mut ui = Map::new();
    ui.insert("displayModes".to_string(), json!(config.display_modes));
    if let Some(ref icon) = config.icon {
        ui.insert("icon".to_string(), json!(icon_data_uri(icon)));
    }
    if let Some(ref csp) = config.csp {
        ui.insert("csp".to_string(), json!(csp));
    }
    ui.insert("prefersBorder".to_string(), json!(config.prefers_border));
    json!({ UI_META_KEY: ui })
}

/// `_meta` block of the ChatGPT content entry
fn skybridge_meta(config: &ResourceConfig) -> Value {
    json!({ WIDGET_PREFERS_BORDER_META_KEY: config.prefers_border })
}

/// Build the two-entry `resources/read` result
pub fn format_resource_contents(config: &ResourceConfig, html: &str) -> ReadResourceResult {
    ReadResourceResult {
        contents: vec![
            ResourceContents {
                uri: config.uri.clone(),
                mime_type: MCP_APP_MIME_TYPE.to_string(),
                text: html.to_string(),
                meta: Some(mcp_app_meta(config)),
            },
            ResourceContents {
                uri: config.uri.clone(),
                mime_type: SKYBRIDGE_MIME_TYPE.to_string(),
                text: html.to_string(),
                meta: Some(skybridge_meta(config)),
            },
        ],
    }
}

/// `resources/list` entry for a resource
pub fn resource_definition(config: &ResourceConfig) -> ResourceDefinition {
    let meta = config
        .description
        .as_ref()
        .map(|d| json!({ WIDGET_DESCRIPTION_META_KEY: d }));
    ResourceDefinition {
        uri: config.uri.clone(),
        name: config.name.clone(),
        description: config.description.clone(),
        mime_type: MCP_APP_MIME_TYPE.to_string(),
        meta,
    }
}

/// `tools/list` entry for a tool, with both metadata namespaces
pub fn tool_definition(config: &ToolConfig, input_schema: Value) -> ToolDefinition {
    let mut visibility = Vec::new();
    if config.visibility.model {
        visibility.push("model");
    }
    if config.visibility.app {
        visibility.push("app");
    }

    let mut ui = Map::new();
    if let Some(ref uri) = config.ui {
        ui.insert("resourceUri".to_string(), json!(uri));
    }
    ui.insert("visibility".to_string(), json!(visibility));
    if let Some(mode) = config.preferred_display_mode {
        ui.insert("preferredDisplayMode".to_string(), json!(mode));
    }

    let mut meta = Map::new();
    meta.insert(UI_META_KEY.to_string(), Value::Object(ui));
    if let Some(ref uri) = config.ui {
        meta.insert(OUTPUT_TEMPLATE_META_KEY.to_string(), json!(uri));
    }
    meta.insert(
        WIDGET_ACCESSIBLE_META_KEY.to_string(),
        json!(config.visibility.app),
    );
    meta.insert(
        VISIBILITY_META_KEY.to_string(),
        json!(if config.visibility.model {
            "public"
        } else {
            "private"
        }),
    );
    if let Some(ref invoking) = config.invoking {
        meta.insert(INVOKING_META_KEY.to_string(), json!(invoking));
    }
    if let Some(ref invoked) = config.invoked {
        meta.insert(INVOKED_META_KEY.to_string(), json!(invoked));
    }

    ToolDefinition {
        name: config.name.clone(),
        title: config.title.clone(),
        description: config.description.clone(),
        input_schema,
        annotations: config.read_only.then(|| ToolAnnotations {
            read_only_hint: Some(true),
        }),
        meta: Some(Value::Object(meta)),
    }
}
