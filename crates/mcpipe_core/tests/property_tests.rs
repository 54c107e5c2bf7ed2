//! Property-based tests for mcpipe_core.
//!
//! Uses proptest to check invariants of tool merging, target naming and
//! command resolution over arbitrary inputs.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use mcpipe_core::{
    merge_tools, CommandResolver, JsonFileStatusSink, PipeConfig, ServerEntry, StatusSink,
    Target, TargetUpdate, ToolInfo,
};

// ============================================================================
// Strategies
// ============================================================================

fn arb_name() -> impl Strategy<Value = String> {
    "[a-e]{1,2}"
}

fn arb_tool() -> impl Strategy<Value = ToolInfo> {
    (arb_name(), "[a-z ]{0,8}").prop_map(|(name, description)| ToolInfo {
        name,
        description,
        input_schema: serde_json::Value::Null,
    })
}

fn arb_stdio_entry() -> impl Strategy<Value = ServerEntry> {
    (
        "[a-z_]{1,12}",
        prop::collection::vec("[a-z0-9-]{1,6}", 0..4),
        prop::collection::btree_map("[A-Z]{1,4}", "[a-z0-9]{0,4}", 0..3),
    )
        .prop_map(|(command, args, env)| ServerEntry {
            command: Some(command),
            args,
            env: env
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect(),
            ..Default::default()
        })
}

// ============================================================================
// Tool merge
// ============================================================================

proptest! {
    /// After a merge, names are unique and every incoming tool wins over
    /// the previous entry of the same name.
    #[test]
    fn merge_yields_unique_names_with_newest_entries(
        first in prop::collection::vec(arb_tool(), 0..8),
        second in prop::collection::vec(arb_tool(), 0..8),
    ) {
        let mut merged = Vec::new();
        merge_tools(&mut merged, first.clone());
        merge_tools(&mut merged, second.clone());

        let mut seen = std::collections::HashSet::new();
        for tool in &merged {
            prop_assert!(seen.insert(tool.name.clone()), "duplicate {}", tool.name);
        }

        let mut expected: BTreeMap<String, ToolInfo> = BTreeMap::new();
        for tool in first.into_iter().chain(second) {
            expected.insert(tool.name.clone(), tool);
        }
        prop_assert_eq!(merged.len(), expected.len());
        for tool in &merged {
            prop_assert_eq!(Some(tool), expected.get(&tool.name));
        }
    }

    /// Merging the same list twice changes nothing.
    #[test]
    fn merge_is_idempotent(tools in prop::collection::vec(arb_tool(), 0..8)) {
        let mut once = Vec::new();
        merge_tools(&mut once, tools.clone());
        let mut twice = once.clone();
        merge_tools(&mut twice, tools);
        prop_assert_eq!(once, twice);
    }
}

// ============================================================================
// Targets and resolution
// ============================================================================

proptest! {
    #[test]
    fn composite_target_round_trips(server in "[a-z]{1,8}", endpoint in "[a-z]{1,8}") {
        let target = Target::with_endpoint(server.clone(), endpoint.clone());
        let parsed = Target::parse(&target.to_string());
        prop_assert_eq!(parsed.server(), server.as_str());
        prop_assert_eq!(parsed.endpoint(), Some(endpoint.as_str()));
    }

    /// Resolution is a pure function of the config snapshot.
    #[test]
    fn resolve_is_deterministic(entry in arb_stdio_entry()) {
        let mut config = PipeConfig::default();
        config.mcp_servers.insert("srv".into(), entry);
        let resolver = CommandResolver::default();
        let target = Target::new("srv");
        let a = resolver.resolve(&config, &target);
        let b = resolver.resolve(&config.clone(), &target);
        prop_assert_eq!(a, b);
    }
}

// ============================================================================
// Concurrent writers
// ============================================================================

#[tokio::test]
async fn test_concurrent_file_sink_writers_do_not_corrupt() {
    let dir = tempfile::TempDir::new().unwrap();
    let sink = Arc::new(JsonFileStatusSink::new(dir.path().join("status.json")));
    sink.init().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let sink = sink.clone();
        handles.push(tokio::spawn(async move {
            let target = format!("t{}", i % 4);
            sink.update_target(&target, TargetUpdate::running()).await;
            sink.merge_tools(&target, vec![ToolInfo::named(format!("tool{}", i))])
                .await;
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let snap = sink.snapshot().await;
    assert_eq!(snap.tools.len(), 4);
    let total_tools: usize = snap.tools.values().map(|t| t.tools.len()).sum();
    assert_eq!(total_tools, 16);
}
