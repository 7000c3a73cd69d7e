//! Instance id resolution
//!
//! Decides which instance a tool call targets. Singleton resources share one
//! id per resource URI; multi-instance resources get a fresh id per call when
//! the calling host can render several widgets for the same resource. Host
//! support is a property of the calling session, not of the process.

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;

use crate::types::InstanceId;

/// Prefix of every generated instance id
pub const INSTANCE_ID_PREFIX: &str = "inst_";

/// Length of the random suffix of generated ids
pub const INSTANCE_ID_SUFFIX_LEN: usize = 7;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Client names known to render one widget per tool call
const MULTI_INSTANCE_CLIENTS: &[&str] = &["chatgpt", "openai"];

/// Generate a new instance id: `inst_<epoch millis>_<7 base36 chars>`
///
/// No uniqueness check is performed.
pub fn generate_instance_id() -> InstanceId {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..INSTANCE_ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!(
        "{}{}_{}",
        INSTANCE_ID_PREFIX,
        Utc::now().timestamp_millis(),
        suffix
    )
}

/// Whether the connecting host supports several live widgets per resource
///
/// An explicit capability wins: `extensions["io.modelcontextprotocol/ui"].multiInstance`
/// or `experimental["openai/multiInstance"]`. Without one, the client name is
/// matched against known multi-instance hosts. Unknown hosts are treated as
/// singleton-only.
pub fn host_supports_multi_instance(client_name: Option<&str>, capabilities: &Value) -> bool {
    let declared = capabilities
        .pointer("/extensions/io.modelcontextprotocol~1ui/multiInstance")
        .or_else(|| capabilities.pointer("/experimental/openai~1multiInstance"))
        .and_then(Value::as_bool);
    if let Some(declared) = declared {
        return declared;
    }

    let Some(name) = client_name else {
        return false;
    };
    let name = name.to_lowercase();
    MULTI_INSTANCE_CLIENTS
        .iter()
        .any(|known| name.contains(known))
}

/// Maps tool calls to instance ids
#[derive(Debug, Default)]
pub struct IdentityResolver {
    /// Resource URI -> singleton instance id
    singletons: DashMap<String, InstanceId>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the instance id for a call against `resource_uri`
    ///
    /// An explicit `input_instance_id` always wins and is not checked for
    /// existence. A fresh id is minted only when the resource is
    /// `multi_instance` and the calling host supports it.
    pub fn resolve(
        &self,
        resource_uri: &str,
        input_instance_id: Option<&str>,
        multi_instance: bool,
        host_multi_instance: bool,
    ) -> InstanceId {
        if let Some(explicit) = input_instance_id {
            return explicit.to_string();
        }

        if multi_instance && host_multi_instance {
            let id = generate_instance_id();
            tracing::debug!(resource = resource_uri, instance_id = %id, "Minted multi-instance id");
            return id;
        }

        self.singletons
            .entry(resource_uri.to_string())
            .or_insert_with(|| {
                let id = generate_instance_id();
                tracing::debug!(resource = resource_uri, instance_id = %id, "Created singleton instance");
                id
            })
            .clone()
    }

    /// Current singleton id for a resource, if one was created
    pub fn singleton_for(&self, resource_uri: &str) -> Option<InstanceId> {
        self.singletons.get(resource_uri).map(|id| id.clone())
    }

    /// Drop every singleton mapping that points at `instance_id`
    pub fn forget_instance(&self, instance_id: &str) -> bool {
        let before = self.singletons.len();
        self.singletons.retain(|_, id| id != instance_id);
        self.singletons.len() != before
    }

    pub fn clear(&self) {
        self.singletons.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_generated_id_format() {
        let id = generate_instance_id();
        let rest = id.strip_prefix(INSTANCE_ID_PREFIX).unwrap();
        let (millis, suffix) = rest.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), INSTANCE_ID_SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_singleton_reuse() {
        let resolver = IdentityResolver::new();
        let first = resolver.resolve("ui://notes/panel", None, false, false);
        let second = resolver.resolve("ui://notes/panel", None, false, true);
        assert_eq!(first, second);

        let other = resolver.resolve("ui://other", None, false, false);
        assert_ne!(first, other);
    }

    #[test]
    fn test_multi_instance_requires_host_support() {
        let resolver = IdentityResolver::new();
        let a = resolver.resolve("ui://counter", None, true, false);
        let b = resolver.resolve("ui://counter", None, true, false);
        assert_eq!(a, b, "singleton-only host must never see two ids");

        let ids: HashSet<_> = (0..20)
            .map(|_| resolver.resolve("ui://counter", None, true, true))
            .collect();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn test_multi_instance_host_does_not_leak_to_singleton_host() {
        let resolver = IdentityResolver::new();
        let singleton = resolver.resolve("ui://counter", None, true, false);

        for _ in 0..5 {
            assert_ne!(resolver.resolve("ui://counter", None, true, true), singleton);
        }
        assert_eq!(resolver.resolve("ui://counter", None, true, false), singleton);
        assert_eq!(resolver.resolve("ui://counter", None, true, false), singleton);
    }

    #[test]
    fn test_explicit_id_wins() {
        let resolver = IdentityResolver::new();
        assert_eq!(
            resolver.resolve("ui://counter", Some("inst_custom"), true, true),
            "inst_custom"
        );
        assert_eq!(
            resolver.resolve("ui://notes", Some("inst_custom"), false, false),
            "inst_custom"
        );
        assert!(resolver.singleton_for("ui://notes").is_none());
    }

    #[test]
    fn test_forget_instance() {
        let resolver = IdentityResolver::new();
        let id = resolver.resolve("ui://notes", None, false, false);
        assert!(resolver.forget_instance(&id));
        assert!(!resolver.forget_instance(&id));
        assert_ne!(resolver.resolve("ui://notes", None, false, false), id);
    }

    #[test]
    fn test_host_detection() {
        assert!(!host_supports_multi_instance(None, &json!({})));
        assert!(!host_supports_multi_instance(Some("claude-ai"), &json!({})));
        assert!(host_supports_multi_instance(Some("ChatGPT"), &json!({})));
        assert!(host_supports_multi_instance(
            Some("openai-mcp"),
            &json!({"roots": {}})
        ));

        let declared = json!({
            "extensions": {"io.modelcontextprotocol/ui": {"multiInstance": true}}
        });
        assert!(host_supports_multi_instance(Some("some-host"), &declared));

        let denied = json!({"experimental": {"openai/multiInstance": false}});
        assert!(!host_supports_multi_instance(Some("chatgpt"), &denied));
    }
}
