//! Core types for mcp-apps

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// URI scheme every UI resource must use
pub const UI_URI_SCHEME: &str = "ui://";

/// Check if a URI is a UI resource URI
pub fn is_ui_resource_uri(uri: &str) -> bool {
    uri.starts_with(UI_URI_SCHEME)
}

/// Instance identifier
pub type InstanceId = String;

// =============================================================================
// Resources
// =============================================================================

/// Display modes a widget can be rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Inline,
    Pip,
    Fullscreen,
}

/// Content security policy for a widget
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CspPolicy {
    /// Origins the widget may open connections to
    #[serde(default)]
    pub connect_domains: Vec<String>,
    /// Origins the widget may load scripts, styles and images from
    #[serde(default)]
    pub resource_domains: Vec<String>,
}

impl CspPolicy {
    pub fn connect(mut self, domain: impl Into<String>) -> Self {
        self.connect_domains.push(domain.into());
        self
    }

    pub fn resource(mut self, domain: impl Into<String>) -> Self {
        self.resource_domains.push(domain.into());
        self
    }
}

type HtmlLoaderFn = dyn Fn() -> anyhow::Result<String> + Send + Sync;
type HtmlLazyFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync;

/// Where a resource's HTML comes from
#[derive(Clone)]
pub enum HtmlSource {
    /// Inline HTML string
    Static(String),
    /// Synchronous loader, called on every read
    Loader(Arc<HtmlLoaderFn>),
    /// Async loader, called on every read
    Lazy(Arc<HtmlLazyFn>),
}

impl HtmlSource {
    /// Produce the HTML for a read
    pub async fn load(&self) -> Result<String> {
        match self {
            HtmlSource::Static(html) => Ok(html.clone()),
            HtmlSource::Loader(f) => f().map_err(|e| AppError::ResourceLoad(e.to_string())),
            HtmlSource::Lazy(f) => f().await.map_err(|e| AppError::ResourceLoad(e.to_string())),
        }
    }
}

impl fmt::Debug for HtmlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HtmlSource::Static(html) => write!(f, "Static({} bytes)", html.len()),
            HtmlSource::Loader(_) => f.write_str("Loader"),
            HtmlSource::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

/// Static configuration of a UI resource
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub name: String,
    pub uri: String,
    pub description: Option<String>,
    pub html: HtmlSource,
    pub display_modes: Vec<DisplayMode>,
    /// SVG markup, emitted as a data URI
    pub icon: Option<String>,
    pub csp: Option<CspPolicy>,
    pub prefers_border: bool,
    /// Mint a fresh instance per tool call (when the host supports it)
    pub multi_instance: bool,
    /// Attach a WebSocket to each instance
    pub websocket: bool,
}

impl ResourceConfig {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            description: None,
            html: HtmlSource::Static(String::new()),
            display_modes: vec![DisplayMode::Inline],
            icon: None,
            csp: None,
            prefers_border: false,
            multi_instance: false,
            websocket: false,
        }
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = HtmlSource::Static(html.into());
        self
    }

    pub fn html_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.html = HtmlSource::Loader(Arc::new(loader));
        self
    }

    pub fn html_lazy<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.html = HtmlSource::Lazy(Arc::new(move || Box::pin(loader())));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn display_modes(mut self, modes: impl IntoIterator<Item = DisplayMode>) -> Self {
        self.display_modes = modes.into_iter().collect();
        self
    }

    pub fn icon_svg(mut self, svg: impl Into<String>) -> Self {
        self.icon = Some(svg.into());
        self
    }

    pub fn csp(mut self, csp: CspPolicy) -> Self {
        self.csp = Some(csp);
        self
    }

    pub fn prefers_border(mut self, prefers_border: bool) -> Self {
        self.prefers_border = prefers_border;
        self
    }

    pub fn multi_instance(mut self, multi_instance: bool) -> Self {
        self.multi_instance = multi_instance;
        self
    }

    pub fn websocket(mut self, websocket: bool) -> Self {
        self.websocket = websocket;
        self
    }

    /// Validate the configuration before registration
    pub fn validate(&self) -> Result<()> {
        if !is_ui_resource_uri(&self.uri) {
            return Err(AppError::InvalidInput(format!(
                "Resource URI must start with {}: {}",
                UI_URI_SCHEME, self.uri
            )));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Resource name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tools
// =============================================================================

/// Who can see and invoke a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolVisibility {
    /// Listed to the model
    pub model: bool,
    /// Callable from the widget
    pub app: bool,
}

impl Default for ToolVisibility {
    fn default() -> Self {
        Self {
            model: true,
            app: true,
        }
    }
}

/// Static configuration of a tool
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub name: String,
    pub description: String,
    pub title: Option<String>,
    /// URI of the UI resource this tool renders into
    pub ui: Option<String>,
    pub visibility: ToolVisibility,
    pub preferred_display_mode: Option<DisplayMode>,
    /// Status shown while the tool runs
    pub invoking: Option<String>,
    /// Status shown once the tool finished
    pub invoked: Option<String>,
    pub read_only: bool,
}

impl ToolConfig {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            title: None,
            ui: None,
            visibility: ToolVisibility::default(),
            preferred_display_mode: None,
            invoking: None,
            invoked: None,
            read_only: false,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn ui(mut self, resource_uri: impl Into<String>) -> Self {
        self.ui = Some(resource_uri.into());
        self
    }

    pub fn visibility(mut self, model: bool, app: bool) -> Self {
        self.visibility = ToolVisibility { model, app };
        self
    }

    pub fn preferred_display_mode(mut self, mode: DisplayMode) -> Self {
        self.preferred_display_mode = Some(mode);
        self
    }

    pub fn invoking(mut self, message: impl Into<String>) -> Self {
        self.invoking = Some(message.into());
        self
    }

    pub fn invoked(mut self, message: impl Into<String>) -> Self {
        self.invoked = Some(message.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Result returned by application tool handlers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_height: Option<u32>,
    #[serde(default)]
    pub is_error: bool,
    /// Suppress instance/websocket metadata (read-only tools)
    #[serde(default)]
    pub no_widget: bool,
}

impl ToolResult {
    /// Result carrying structured data
    pub fn data(data: impl Serialize) -> Self {
        Self {
            data: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
            ..Default::default()
        }
    }

    /// Text-only result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Application-level error result
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            is_error: true,
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_inline_height(mut self, height: u32) -> Self {
        self.inline_height = Some(height);
        self
    }

    pub fn no_widget(mut self) -> Self {
        self.no_widget = true;
        self
    }
}
