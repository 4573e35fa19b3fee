//! Integration tests for chain construction, successor resolution,
//! lifecycle hooks and hot reload.

use async_trait::async_trait;
use chainflow::types::SUCCESS;
use chainflow::{
    Aspect, ChainContext, ChainDefinition, ChainNode, ChainPool, Component, ComponentRegistry,
    Configuration, DataFormat, DestroyAspect, DslParser, Engine, EngineConfig, FlowContext,
    Handled, JsonParser, Message, NodeDefinition, NodeId, ReloadAspect,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn build(definition: ChainDefinition) -> Arc<ChainContext> {
    ChainContext::build(EngineConfig::new(), Vec::new(), definition).unwrap()
}

fn ids(nodes: &[Arc<dyn ChainNode>]) -> Vec<String> {
    nodes.iter().map(|n| n.node_id().id).collect()
}

/// Test component that records which instances were destroyed and what
/// messages it saw, tagged per node through its configuration.
#[derive(Debug)]
struct Probe {
    tag: String,
    destroyed: Arc<Mutex<Vec<String>>>,
    seen: Arc<Mutex<Vec<Message>>>,
}

#[async_trait]
impl Component for Probe {
    fn type_name(&self) -> &str {
        "probe"
    }

    fn create(&self) -> Box<dyn Component> {
        Box::new(Probe {
            tag: String::new(),
            destroyed: self.destroyed.clone(),
            seen: self.seen.clone(),
        })
    }

    fn init(&mut self, _config: &EngineConfig, settings: &Configuration) -> anyhow::Result<()> {
        self.tag = settings
            .get("tag")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(())
    }

    async fn handle(&self, _ctx: &FlowContext, msg: Message) -> anyhow::Result<Handled> {
        self.seen.lock().unwrap().push(msg.clone());
        Ok(Handled::Forward(msg, SUCCESS.to_string()))
    }

    fn destroy(&self) {
        self.destroyed.lock().unwrap().push(self.tag.clone());
    }
}

struct ProbeHandles {
    destroyed: Arc<Mutex<Vec<String>>>,
    seen: Arc<Mutex<Vec<Message>>>,
}

fn config_with_probe() -> (EngineConfig, ProbeHandles) {
    let destroyed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = ComponentRegistry::with_builtins();
    registry.register(Box::new(Probe {
        tag: String::new(),
        destroyed: destroyed.clone(),
        seen: seen.clone(),
    }));
    let config = EngineConfig::new().with_registry(Arc::new(registry));
    (config, ProbeHandles { destroyed, seen })
}

#[test]
fn linear_chain_of_three_nodes() {
    let chain = build(
        ChainDefinition::new("s1")
            .with_node(NodeDefinition::new("a", "log"))
            .with_node(NodeDefinition::new("b", "log"))
            .with_node(NodeDefinition::new("c", "log"))
            .with_connection("a", "b", "Success")
            .with_connection("b", "c", "Success"),
    );

    assert_eq!(chain.first_node().unwrap().node_id(), NodeId::node("a"));

    let (next, found) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert!(found);
    assert_eq!(ids(&next), ["b"]);

    let (next, found) = chain.next_nodes(&NodeId::node("b"), "Success");
    assert!(found);
    assert_eq!(ids(&next), ["c"]);

    let (next, found) = chain.next_nodes(&NodeId::node("c"), "Success");
    assert!(!found);
    assert!(next.is_empty());
}

#[test]
fn branching_on_relation_label() {
    let chain = build(
        ChainDefinition::new("s2")
            .with_node(NodeDefinition::new("x", "msgTypeFilter"))
            .with_node(NodeDefinition::new("y", "log"))
            .with_node(NodeDefinition::new("z", "log"))
            .with_connection("x", "y", "True")
            .with_connection("x", "z", "False"),
    );

    let (next, _) = chain.next_nodes(&NodeId::node("x"), "True");
    assert_eq!(ids(&next), ["y"]);
    let (next, _) = chain.next_nodes(&NodeId::node("x"), "False");
    assert_eq!(ids(&next), ["z"]);
    let (next, found) = chain.next_nodes(&NodeId::node("x"), "Other");
    assert!(next.is_empty());
    assert!(!found);
}

#[test]
fn sub_chain_edge_resolves_through_pool() {
    let pool = ChainPool::new();
    let sub = Engine::new(
        "sub1",
        EngineConfig::new(),
        Vec::new(),
        ChainDefinition::new("sub1").with_node(NodeDefinition::new("s", "log")),
    )
    .unwrap();
    pool.register(sub);

    let chain = build(
        ChainDefinition::new("s3")
            .with_node(NodeDefinition::new("a", "log"))
            .with_chain_connection("a", "sub1", "Success"),
    );
    chain.set_pool(pool);

    let (next, found) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert!(found);
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].node_id(), NodeId::chain("sub1"));
}

#[test]
fn missing_sub_chain_is_dropped_silently() {
    let chain = build(
        ChainDefinition::new("s3b")
            .with_node(NodeDefinition::new("a", "log"))
            .with_chain_connection("a", "sub1", "Success"),
    );
    // A pool that never heard of sub1.
    chain.set_pool(ChainPool::new());

    let (next, found) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert!(next.is_empty());
    assert!(!found);
}

#[test]
fn empty_chain_synthesizes_an_entry_node() {
    let chain = build(ChainDefinition::new("s4"));

    assert!(chain.is_empty());
    let first = chain.first_node().expect("synthesized node must be present");
    assert_eq!(first.node_id(), NodeId::node(""));

    let (next, found) = chain.next_nodes(&NodeId::node("anything"), "Success");
    assert!(next.is_empty());
    assert!(!found);
}

#[test]
fn out_of_range_first_node_index_marks_chain_empty() {
    let mut definition = ChainDefinition::new("s4b").with_node(NodeDefinition::new("a", "log"));
    definition.graph.first_node_index = 7;
    let chain = build(definition);

    assert!(chain.is_empty());
    assert!(chain.first_node().is_some());
    // The real node is still addressable.
    assert!(chain.node_by_id(&NodeId::node("a")).is_some());
}

#[test]
fn auto_assigned_ids_resolve_in_connections() {
    let chain = build(
        ChainDefinition::new("s5")
            .with_node(NodeDefinition::new("", "log"))
            .with_node(NodeDefinition::new("", "log"))
            .with_connection("node0", "node1", "Success"),
    );

    let (next, found) = chain.next_nodes(&NodeId::node("node0"), "Success");
    assert!(found);
    assert_eq!(ids(&next), ["node1"]);
}

#[test]
fn reload_self_swaps_topology_and_destroys_old_nodes() {
    let (config, handles) = config_with_probe();
    let chain = ChainContext::build(
        config,
        Vec::new(),
        ChainDefinition::new("s6")
            .with_node(NodeDefinition::new("a", "probe").with_setting("tag", json!("a")))
            .with_node(NodeDefinition::new("b", "probe").with_setting("tag", json!("b")))
            .with_connection("a", "b", "Success"),
    )
    .unwrap();

    // Warm the cache so the reload provably clears it.
    let (next, _) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert_eq!(ids(&next), ["b"]);

    let replacement = ChainDefinition::new("s6")
        .with_node(NodeDefinition::new("a", "probe").with_setting("tag", json!("a2")))
        .with_node(NodeDefinition::new("c", "probe").with_setting("tag", json!("c")))
        .with_connection("a", "c", "Success");
    chain
        .reload_self(&serde_json::to_vec(&replacement).unwrap())
        .unwrap();

    let (next, found) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert!(found);
    assert_eq!(ids(&next), ["c"]);
    assert!(chain.node_by_id(&NodeId::node("b")).is_none());

    let destroyed = handles.destroyed.lock().unwrap();
    assert!(destroyed.contains(&"b".to_string()));
    assert!(destroyed.contains(&"a".to_string()));
}

#[test]
fn successor_lists_are_cached_by_identity() {
    let chain = build(
        ChainDefinition::new("cache")
            .with_node(NodeDefinition::new("a", "log"))
            .with_node(NodeDefinition::new("b", "log"))
            .with_connection("a", "b", "Success"),
    );

    let (first, _) = chain.next_nodes(&NodeId::node("a"), "Success");
    let (second, _) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert_eq!(first.len(), second.len());
    assert!(Arc::ptr_eq(&first[0], &second[0]));
}

#[test]
fn duplicate_relations_yield_duplicate_successors() {
    let chain = build(
        ChainDefinition::new("dup")
            .with_node(NodeDefinition::new("a", "log"))
            .with_node(NodeDefinition::new("b", "log"))
            .with_connection("a", "b", "Success")
            .with_connection("a", "b", "Success"),
    );

    let (next, _) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert_eq!(ids(&next), ["b", "b"]);
}

#[test]
fn dangling_relation_targets_are_dropped() {
    let chain = build(
        ChainDefinition::new("dangling")
            .with_node(NodeDefinition::new("a", "log"))
            .with_node(NodeDefinition::new("b", "log"))
            .with_connection("a", "ghost", "Success")
            .with_connection("a", "b", "Success"),
    );

    let (next, found) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert!(found);
    assert_eq!(ids(&next), ["b"]);
}

#[test]
fn routes_preserve_definition_order_across_kinds() {
    let chain = build(
        ChainDefinition::new("routes")
            .with_node(NodeDefinition::new("a", "log"))
            .with_node(NodeDefinition::new("b", "log"))
            .with_connection("a", "b", "Success")
            .with_chain_connection("a", "other", "Success"),
    );

    let routes = chain.routes_of(&NodeId::node("a")).unwrap();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].to, NodeId::node("b"));
    assert_eq!(routes[1].to, NodeId::chain("other"));
    assert!(chain.routes_of(&NodeId::node("b")).is_none());
}

#[test]
fn vars_and_secrets_are_resolved_at_build() {
    let key = "unit-test-key";
    let good = chainflow::secret::encrypt("s3cret", key).unwrap();

    let mut definition = ChainDefinition::new("cfg");
    definition.chain.configuration = json!({
        "vars": {"host": "example.com", "port": 8080},
        "secrets": {"good": good, "bad": "not-decryptable"}
    })
    .as_object()
    .unwrap()
    .clone();

    let chain = ChainContext::build(
        EngineConfig::new().with_secret_key(key),
        Vec::new(),
        definition,
    )
    .unwrap();

    let vars = chain.vars();
    assert_eq!(vars.get("host").map(String::as_str), Some("example.com"));
    assert_eq!(vars.get("port").map(String::as_str), Some("8080"));

    let secrets = chain.secrets();
    assert_eq!(secrets.get("good").map(String::as_str), Some("s3cret"));
    assert_eq!(
        secrets.get("bad").map(String::as_str),
        Some("not-decryptable")
    );
}

#[test]
fn reload_child_preserves_node_identity_and_cache() {
    let chain = build(
        ChainDefinition::new("child")
            .with_node(NodeDefinition::new("a", "log"))
            .with_node(NodeDefinition::new("b", "log"))
            .with_connection("a", "b", "Success"),
    );

    let before = chain.node_by_id(&NodeId::node("b")).unwrap();
    let (cached_before, _) = chain.next_nodes(&NodeId::node("a"), "Success");

    let replacement = NodeDefinition::new("b", "log").with_setting("template", json!("updated"));
    chain
        .reload_child(
            &NodeId::node("b"),
            &serde_json::to_vec(&replacement).unwrap(),
        )
        .unwrap();

    let after = chain.node_by_id(&NodeId::node("b")).unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    let (cached_after, _) = chain.next_nodes(&NodeId::node("a"), "Success");
    assert!(Arc::ptr_eq(&cached_before[0], &cached_after[0]));

    // The node carries the new definition.
    let encoded = after.dsl().unwrap();
    let decoded = JsonParser.decode_node(&encoded).unwrap();
    assert_eq!(decoded.configuration["template"], json!("updated"));
}

#[test]
fn reload_child_of_unknown_node_is_a_noop() {
    let chain = build(ChainDefinition::new("noop").with_node(NodeDefinition::new("a", "log")));
    assert!(chain.reload_child(&NodeId::node("ghost"), b"garbage").is_ok());
}

struct Recording {
    reloads: AtomicUsize,
    reload_errors: AtomicUsize,
    destroys: AtomicUsize,
}

impl Recording {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reloads: AtomicUsize::new(0),
            reload_errors: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
        })
    }
}

impl Aspect for Recording {
    fn as_reload(&self) -> Option<&dyn ReloadAspect> {
        Some(self)
    }

    fn as_destroy(&self) -> Option<&dyn DestroyAspect> {
        Some(self)
    }
}

impl ReloadAspect for Recording {
    fn on_reload(
        &self,
        _chain: &ChainContext,
        _node: &dyn ChainNode,
        outcome: Option<&anyhow::Error>,
    ) -> anyhow::Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if outcome.is_some() {
            self.reload_errors.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl DestroyAspect for Recording {
    fn on_destroy(&self, _chain: &ChainContext) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

struct Veto;

impl Aspect for Veto {
    fn as_reload(&self) -> Option<&dyn ReloadAspect> {
        Some(self)
    }
}

impl ReloadAspect for Veto {
    fn on_reload(
        &self,
        _chain: &ChainContext,
        _node: &dyn ChainNode,
        _outcome: Option<&anyhow::Error>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("vetoed")
    }
}

#[test]
fn reload_hooks_run_even_when_decode_fails() {
    let recording = Recording::new();
    let chain = ChainContext::build(
        EngineConfig::new(),
        vec![recording.clone() as Arc<dyn Aspect>],
        ChainDefinition::new("hooks").with_node(NodeDefinition::new("a", "log")),
    )
    .unwrap();

    assert!(chain.reload_self(b"{ this is not json").is_err());
    assert_eq!(recording.reloads.load(Ordering::SeqCst), 1);
    assert_eq!(recording.reload_errors.load(Ordering::SeqCst), 1);

    // Decoding failed, so the old topology must survive.
    assert!(chain.node_by_id(&NodeId::node("a")).is_some());
}

#[test]
fn hook_error_supersedes_and_short_circuits() {
    let recording = Recording::new();
    let chain = ChainContext::build(
        EngineConfig::new(),
        vec![Arc::new(Veto) as Arc<dyn Aspect>, recording.clone() as Arc<dyn Aspect>],
        ChainDefinition::new("veto").with_node(NodeDefinition::new("a", "log")),
    )
    .unwrap();

    let replacement = ChainDefinition::new("veto").with_node(NodeDefinition::new("a", "log"));
    let err = chain
        .reload_self(&serde_json::to_vec(&replacement).unwrap())
        .unwrap_err();
    assert_eq!(err.to_string(), "vetoed");
    assert_eq!(recording.reloads.load(Ordering::SeqCst), 0);
}

#[test]
fn destroy_cascades_to_nodes_and_hooks() {
    let recording = Recording::new();
    let (config, handles) = config_with_probe();
    let chain = ChainContext::build(
        config,
        vec![recording.clone() as Arc<dyn Aspect>],
        ChainDefinition::new("destroy")
            .with_node(NodeDefinition::new("a", "probe").with_setting("tag", json!("a")))
            .with_node(NodeDefinition::new("b", "probe").with_setting("tag", json!("b"))),
    )
    .unwrap();

    chain.destroy();

    let mut destroyed = handles.destroyed.lock().unwrap().clone();
    destroyed.sort();
    assert_eq!(destroyed, ["a", "b"]);
    assert_eq!(recording.destroys.load(Ordering::SeqCst), 1);
}

#[test]
fn dsl_roundtrips_through_the_parser() {
    let chain = build(
        ChainDefinition::new("roundtrip")
            .with_node(NodeDefinition::new("a", "log").with_setting("template", json!("${data}")))
            .with_node(NodeDefinition::new("b", "log"))
            .with_connection("a", "b", "Success"),
    );

    let encoded = chain.dsl().unwrap();
    let reparsed = ChainContext::build(
        EngineConfig::new(),
        Vec::new(),
        serde_json::from_slice(&encoded).unwrap(),
    )
    .unwrap();
    assert_eq!(reparsed.definition(), chain.definition());
}

#[test]
fn init_with_self_definition_swaps_in_place() {
    let chain = build(ChainDefinition::new("init").with_node(NodeDefinition::new("a", "log")));

    let replacement = ChainDefinition::new("init")
        .with_node(NodeDefinition::new("x", "log"))
        .with_node(NodeDefinition::new("y", "log"))
        .with_connection("x", "y", "Success");
    let mut settings = Configuration::new();
    settings.insert(
        "selfDefinition".to_string(),
        serde_json::to_value(&replacement).unwrap(),
    );

    ChainNode::init(chain.as_ref(), &chain.config(), &settings).unwrap();

    assert!(chain.node_by_id(&NodeId::node("a")).is_none());
    let (next, _) = chain.next_nodes(&NodeId::node("x"), "Success");
    assert_eq!(ids(&next), ["y"]);

    // A configuration without the entry is a no-op.
    ChainNode::init(chain.as_ref(), &chain.config(), &Configuration::new()).unwrap();
    assert!(chain.node_by_id(&NodeId::node("x")).is_some());
}

#[tokio::test]
async fn messages_flow_through_filter_and_transform() {
    let (config, handles) = config_with_probe();
    let pool = ChainPool::new();
    let engine = Engine::new(
        "flow",
        config,
        Vec::new(),
        ChainDefinition::new("flow")
            .with_node(
                NodeDefinition::new("route", "msgTypeFilter")
                    .with_setting("types", json!(["TELEMETRY"])),
            )
            .with_node(
                NodeDefinition::new("enrich", "metadataTransform")
                    .with_setting("values", json!({"source": "gateway-7"})),
            )
            .with_node(NodeDefinition::new("sink", "probe"))
            .with_connection("route", "enrich", "True")
            .with_connection("enrich", "sink", "Success"),
    )
    .unwrap();
    pool.register(engine.clone());

    engine
        .process(Message::new("TELEMETRY", DataFormat::Json, r#"{"temp": 21}"#))
        .await
        .unwrap();
    engine
        .process(Message::new("ALARM", DataFormat::Json, "{}"))
        .await
        .unwrap();

    let seen = handles.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].msg_type, "TELEMETRY");
    assert_eq!(
        seen[0].metadata.get("source").map(String::as_str),
        Some("gateway-7")
    );
}

#[tokio::test]
async fn messages_enter_sub_chains_through_the_pool() {
    let (config, handles) = config_with_probe();
    let pool = ChainPool::new();

    let sub = Engine::new(
        "sub",
        config.clone(),
        Vec::new(),
        ChainDefinition::new("sub").with_node(NodeDefinition::new("sink", "probe")),
    )
    .unwrap();
    pool.register(sub);

    let parent = Engine::new(
        "parent",
        config,
        Vec::new(),
        ChainDefinition::new("parent")
            .with_node(NodeDefinition::new("a", "log"))
            .with_chain_connection("a", "sub", "Success"),
    )
    .unwrap();
    pool.register(parent.clone());

    parent
        .process(Message::new("EVENT", DataFormat::Json, "{}"))
        .await
        .unwrap();

    let seen = handles.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].msg_type, "EVENT");
}

#[tokio::test]
async fn empty_chain_consumes_messages() {
    let pool = ChainPool::new();
    let engine = Engine::new(
        "empty",
        EngineConfig::new(),
        Vec::new(),
        ChainDefinition::new("empty"),
    )
    .unwrap();
    pool.register(engine.clone());

    // Nothing to assert beyond "does not error": the synthesized node
    // gives the dispatcher a valid starting point.
    engine
        .process(Message::new("EVENT", DataFormat::Json, "{}"))
        .await
        .unwrap();
}
