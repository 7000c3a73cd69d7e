//! Property-based tests for mcp-apps
//!
//! These tests verify invariants that must hold for all inputs:
//! - Instance ids keep their shape
//! - Singleton resources resolve to one id until destroyed
//! - Formatting never drops the text block or leaks widget metadata
//! - HMR injection keeps the original document intact
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// INSTANCE ID TESTS
// ============================================================================

mod instance_id_tests {
    use super::*;
    use mcp_apps::instance::{
        generate_instance_id, IdentityResolver, INSTANCE_ID_PREFIX, INSTANCE_ID_SUFFIX_LEN,
    };

    #[test]
    fn generated_id_shape() {
        for _ in 0..200 {
            let id = generate_instance_id();
            let rest = id.strip_prefix(INSTANCE_ID_PREFIX).unwrap();
            let (millis, suffix) = rest.split_once('_').unwrap();
            assert!(millis.parse::<u64>().is_ok(), "bad millis in {}", id);
            assert_eq!(suffix.len(), INSTANCE_ID_SUFFIX_LEN);
            assert!(suffix
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
    }

    proptest! {
        /// Invariant: repeated singleton resolution returns one id per URI
        #[test]
        fn singleton_is_stable(path in "[a-z]{1,12}(/[a-z]{1,8}){0,2}", calls in 1usize..20) {
            let resolver = IdentityResolver::new();
            let uri = format!("ui://{}", path);
            let first = resolver.resolve(&uri, None, false, false);
            for _ in 0..calls {
                prop_assert_eq!(resolver.resolve(&uri, None, false, true), first.clone());
            }
        }

        /// Invariant: an explicit id is returned unchanged, whatever it is
        #[test]
        fn explicit_id_wins(explicit in "\\PC{0,40}", multi in any::<bool>(), host in any::<bool>()) {
            let resolver = IdentityResolver::new();
            prop_assert_eq!(resolver.resolve("ui://x", Some(explicit.as_str()), multi, host), explicit);
        }

        /// Invariant: multi-instance with host support never repeats an id
        #[test]
        fn multi_instance_is_fresh(calls in 2usize..30) {
            let resolver = IdentityResolver::new();
            let ids: std::collections::HashSet<_> =
                (0..calls).map(|_| resolver.resolve("ui://counter", None, true, true)).collect();
            prop_assert_eq!(ids.len(), calls);
        }

        /// Invariant: a singleton-only host sees one id however many
        /// multi-instance calls other hosts make in between
        #[test]
        fn singleton_host_isolated(interleaved in 0usize..10, calls in 1usize..10) {
            let resolver = IdentityResolver::new();
            let first = resolver.resolve("ui://counter", None, true, false);
            for _ in 0..calls {
                for _ in 0..interleaved {
                    resolver.resolve("ui://counter", None, true, true);
                }
                prop_assert_eq!(resolver.resolve("ui://counter", None, true, false), first.clone());
            }
        }
    }
}

// ============================================================================
// FORMATTER TESTS
// ============================================================================

mod format_tests {
    use super::*;
    use mcp_apps::mcp::{format_resource_contents, format_tool_result};
    use mcp_apps::{ResourceConfig, ToolResult};

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,16}".prop_map(Value::from),
        ]
    }

    fn json_value() -> impl Strategy<Value = Value> {
        json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        /// Invariant: there is always exactly one text block
        #[test]
        fn one_text_block(
            data in prop::option::of(json_value()),
            text in prop::option::of("\\PC{0,20}"),
            instance in prop::option::of("inst_[0-9]{3}"),
        ) {
            let result = ToolResult { data, text, ..Default::default() };
            let formatted = format_tool_result(&result, instance.as_deref(), None);
            prop_assert_eq!(formatted.content.len(), 1);
        }

        /// Invariant: no_widget never injects instance data or widget meta
        #[test]
        fn no_widget_suppression(
            data in prop::option::of(json_value()),
            title in prop::option::of("[A-Za-z ]{1,10}"),
        ) {
            let result = ToolResult { data: data.clone(), title, no_widget: true, ..Default::default() };
            let formatted = format_tool_result(&result, Some("inst_1"), Some("ws://h/ws/inst_1"));
            prop_assert!(formatted.meta.is_none());
            prop_assert_eq!(formatted.structured_content, data);
        }

        /// Invariant: with an instance, structured content carries it and the
        /// widget session meta matches
        #[test]
        fn instance_is_injected(data in prop::option::of(json_value()), id in "inst_[0-9]{1,13}_[0-9a-z]{7}") {
            let result = ToolResult { data, ..Default::default() };
            let formatted = format_tool_result(&result, Some(id.as_str()), None);
            let structured = formatted.structured_content.unwrap();
            prop_assert_eq!(&structured["instanceId"], &json!(id));
            prop_assert_eq!(formatted.meta.unwrap(), json!({"openai/widgetSessionId": id}));
        }

        /// Invariant: resource reads yield two entries sharing uri and text
        #[test]
        fn dual_content(html in "\\PC{0,200}", border in any::<bool>()) {
            let config = ResourceConfig::new("Widget", "ui://widget/main").prefers_border(border);
            let result = format_resource_contents(&config, &html);
            prop_assert_eq!(result.contents.len(), 2);
            prop_assert_eq!(&result.contents[0].uri, &result.contents[1].uri);
            prop_assert_eq!(&result.contents[0].text, &html);
            prop_assert_eq!(&result.contents[1].text, &html);
            prop_assert_ne!(&result.contents[0].mime_type, &result.contents[1].mime_type);
        }
    }
}

// ============================================================================
// HMR INJECTION TESTS
// ============================================================================

mod hmr_tests {
    use super::*;
    use mcp_apps::hmr::{hmr_script, inject_hmr_script};

    proptest! {
        /// Invariant: injection only adds the script, never alters the rest
        #[test]
        fn injection_is_additive(html in "\\PC{0,200}", port in 1024u16..65535) {
            let out = inject_hmr_script(&html, port);
            let script = hmr_script(port);
            prop_assert_eq!(out.len(), html.len() + script.len());
            let idx = out.find(&script).unwrap();
            let restored = format!("{}{}", &out[..idx], &out[idx + script.len()..]);
            prop_assert_eq!(restored, html);
        }

        /// Invariant: the script lands right before the last closing body tag
        #[test]
        fn lands_before_body(prefix in "[a-z<>/ ]{0,40}", port in 1024u16..65535) {
            let html = format!("<html><body>{}</body></html>", prefix);
            let out = inject_hmr_script(&html, port);
            let expected_tail = format!("{}</body></html>", hmr_script(port));
            prop_assert!(out.ends_with(&expected_tail));
        }
    }
}
