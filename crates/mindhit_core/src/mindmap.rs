//! crates/mindhit_core/src/mindmap.rs
//!
//! The relationship graph returned by the model and the "galaxy" layout that turns
//! it into positioned nodes and weighted edges.
//!
//! The layout is a pure function of the graph and the duration map: the same input
//! always serialises to the same bytes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::f64::consts::PI;

pub const CORE_NODE_ID: &str = "core";
pub const CORE_COLOR: &str = "#FFD700";
pub const TOPIC_PALETTE: [&str; 8] = [
    "#3B82F6", "#10B981", "#F59E0B", "#EF4444", "#8B5CF6", "#EC4899", "#14B8A6", "#F97316",
];

const TOPIC_RADIUS: f64 = 200.0;
const PAGE_ANGLE_STEP: f64 = 0.4;
const PAGE_RADIUS_BASE: f64 = 60.0;
const PAGE_RADIUS_STEP: f64 = 15.0;
const CONNECTION_WEIGHT_PER_KEYWORD: f64 = 0.2;

//=========================================================================================
// Model Output
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipGraphResponse {
    #[serde(default)]
    pub core: CoreTheme,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoreTheme {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pages: Vec<TopicPage>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopicPage {
    #[serde(default)]
    pub url_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub relevance: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub shared_keywords: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

//=========================================================================================
// Stored Graph
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Core,
    Topic,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub size: f64,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutParams {
    pub center: [f64; 3],
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapLayout {
    #[serde(rename = "type")]
    pub layout_type: String,
    pub params: LayoutParams,
}

impl MindmapLayout {
    pub fn galaxy() -> Self {
        Self {
            layout_type: "galaxy".to_string(),
            params: LayoutParams {
                center: [0.0, 0.0, 0.0],
                scale: 1.0,
            },
        }
    }
}

/// The persisted graph payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapData {
    pub nodes: Vec<MindmapNode>,
    pub edges: Vec<MindmapEdge>,
    pub layout: MindmapLayout,
}

//=========================================================================================
// Layout
//=========================================================================================

fn topic_size(page_count: usize) -> f64 {
    (40.0 + 10.0 * page_count as f64).min(80.0)
}

fn page_size(duration_ms: Option<i64>, relevance: f64) -> f64 {
    let base = match duration_ms {
        Some(ms) => (15.0 + ms as f64 / 20_000.0).min(40.0),
        None => 15.0,
    };
    base * (0.5 + 0.5 * relevance)
}

fn topic_id(topic: &Topic, index: usize) -> String {
    if topic.id.is_empty() {
        format!("topic-{}", index)
    } else {
        topic.id.clone()
    }
}

/// Places the core at the origin, topics on a ring around it, and each topic's
/// pages on a fan around their topic. `durations` maps `url_id` to dwell time.
pub fn build_galaxy(graph: &RelationshipGraphResponse, durations: &HashMap<String, i64>) -> MindmapData {
    let topic_count = graph.topics.len();
    let mut nodes = Vec::with_capacity(1 + topic_count * 4);
    let mut edges = Vec::with_capacity(topic_count * 4 + graph.connections.len());
    let mut placed_pages = BTreeSet::new();

    let mut core_data = Map::new();
    core_data.insert("description".into(), json!(graph.core.description));
    nodes.push(MindmapNode {
        id: CORE_NODE_ID.to_string(),
        label: graph.core.label.clone(),
        node_type: NodeType::Core,
        size: 100.0,
        color: CORE_COLOR.to_string(),
        position: Some(Position { x: 0.0, y: 0.0, z: 0.0 }),
        data: core_data,
    });

    for (i, topic) in graph.topics.iter().enumerate() {
        let id = topic_id(topic, i);
        let angle = 2.0 * PI * i as f64 / topic_count as f64;
        let (tx, ty) = (TOPIC_RADIUS * angle.cos(), TOPIC_RADIUS * angle.sin());

        let mut data = Map::new();
        data.insert("description".into(), json!(topic.description));
        data.insert("keywords".into(), json!(topic.keywords));
        nodes.push(MindmapNode {
            id: id.clone(),
            label: topic.label.clone(),
            node_type: NodeType::Topic,
            size: topic_size(topic.pages.len()),
            color: TOPIC_PALETTE[i % TOPIC_PALETTE.len()].to_string(),
            position: Some(Position { x: tx, y: ty, z: 0.0 }),
            data,
        });
        edges.push(MindmapEdge {
            source: CORE_NODE_ID.to_string(),
            target: id.clone(),
            weight: 1.0,
            label: None,
        });

        let page_count = topic.pages.len() as f64;
        for (j, page) in topic.pages.iter().enumerate() {
            let relevance = page.relevance.clamp(0.0, 1.0);
            let page_id = if page.url_id.is_empty() {
                format!("{}-page-{}", id, j)
            } else {
                page.url_id.clone()
            };

            if placed_pages.insert(page_id.clone()) {
                let sub_angle = angle + (j as f64 - page_count / 2.0) * PAGE_ANGLE_STEP;
                let sub_radius = PAGE_RADIUS_BASE + PAGE_RADIUS_STEP * j as f64;
                let mut data = Map::new();
                data.insert("url_id".into(), json!(page.url_id));
                data.insert("relevance".into(), json!(relevance));
                nodes.push(MindmapNode {
                    id: page_id.clone(),
                    label: page.title.clone(),
                    node_type: NodeType::Page,
                    size: page_size(durations.get(&page.url_id).copied(), relevance),
                    color: TOPIC_PALETTE[i % TOPIC_PALETTE.len()].to_string(),
                    position: Some(Position {
                        x: tx + sub_radius * sub_angle.cos(),
                        y: ty + sub_radius * sub_angle.sin(),
                        z: 0.0,
                    }),
                    data,
                });
            }
            edges.push(MindmapEdge {
                source: id.clone(),
                target: page_id,
                weight: relevance,
                label: None,
            });
        }
    }

    for conn in &graph.connections {
        edges.push(MindmapEdge {
            source: conn.from.clone(),
            target: conn.to.clone(),
            weight: CONNECTION_WEIGHT_PER_KEYWORD * conn.shared_keywords.len() as f64,
            label: Some(conn.reason.clone()).filter(|r| !r.is_empty()),
        });
    }

    MindmapData {
        nodes,
        edges,
        layout: MindmapLayout::galaxy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_graph() -> RelationshipGraphResponse {
        serde_json::from_value(json!({
            "core": {"label": "Rust async", "description": "Learning tokio"},
            "topics": [
                {"id": "t1", "label": "Runtime", "keywords": ["tokio"], "description": "d1",
                 "pages": [{"url_id": "u1", "title": "Tokio docs", "relevance": 1.0},
                           {"url_id": "u2", "title": "Blog", "relevance": 0.5}]},
                {"id": "t2", "label": "Futures", "keywords": ["poll"], "description": "d2",
                 "pages": [{"url_id": "u3", "title": "RFC", "relevance": 0.8}]}
            ],
            "connections": [{"from": "t1", "to": "t2", "shared_keywords": ["async", "await"], "reason": "both async"}]
        }))
        .unwrap()
    }

    #[test]
    fn core_node_is_fixed() {
        let data = build_galaxy(&sample_graph(), &HashMap::new());
        let core = &data.nodes[0];
        assert_eq!(core.id, "core");
        assert_eq!(core.size, 100.0);
        assert_eq!(core.color, "#FFD700");
        assert_eq!(core.position, Some(Position { x: 0.0, y: 0.0, z: 0.0 }));
        assert_eq!(core.data["description"], json!("Learning tokio"));
    }

    #[test]
    fn topics_sit_on_the_ring() {
        let data = build_galaxy(&sample_graph(), &HashMap::new());
        let t1 = data.nodes.iter().find(|n| n.id == "t1").unwrap();
        let t2 = data.nodes.iter().find(|n| n.id == "t2").unwrap();
        assert_eq!(t1.size, 60.0);
        assert_eq!(t2.size, 50.0);
        assert_eq!(t1.color, TOPIC_PALETTE[0]);
        assert_eq!(t2.color, TOPIC_PALETTE[1]);
        let p1 = t1.position.unwrap();
        let p2 = t2.position.unwrap();
        assert!((p1.x - 200.0).abs() < 1e-9 && p1.y.abs() < 1e-9);
        assert!((p2.x + 200.0).abs() < 1e-9 && p2.y.abs() < 1e-6);
    }

    #[test]
    fn page_size_uses_duration_and_relevance() {
        let mut durations = HashMap::new();
        durations.insert("u1".to_string(), 100_000);
        durations.insert("u3".to_string(), 10_000_000);
        let data = build_galaxy(&sample_graph(), &durations);
        let size = |id: &str| data.nodes.iter().find(|n| n.id == id).unwrap().size;
        assert_eq!(size("u1"), 20.0);
        assert_eq!(size("u2"), 15.0 * 0.75);
        assert!((size("u3") - 40.0 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn edges_carry_weights() {
        let data = build_galaxy(&sample_graph(), &HashMap::new());
        assert_eq!(data.edges.len(), 2 + 3 + 1);
        let core_edges: Vec<_> = data.edges.iter().filter(|e| e.source == "core").collect();
        assert!(core_edges.iter().all(|e| e.weight == 1.0));
        let u2 = data.edges.iter().find(|e| e.target == "u2").unwrap();
        assert_eq!((u2.source.as_str(), u2.weight), ("t1", 0.5));
        let conn = data.edges.last().unwrap();
        assert!((conn.weight - 0.4).abs() < 1e-9);
        assert_eq!(conn.label.as_deref(), Some("both async"));
    }

    #[test]
    fn shared_page_yields_one_node() {
        let mut graph = sample_graph();
        graph.topics[1].pages.push(TopicPage {
            url_id: "u1".into(),
            title: "Tokio docs".into(),
            relevance: 0.3,
        });
        let data = build_galaxy(&graph, &HashMap::new());
        assert_eq!(data.nodes.iter().filter(|n| n.id == "u1").count(), 1);
        assert_eq!(data.edges.iter().filter(|e| e.target == "u1").count(), 2);
    }

    #[test]
    fn empty_graph_is_just_the_core() {
        let data = build_galaxy(&RelationshipGraphResponse::default(), &HashMap::new());
        assert_eq!(data.nodes.len(), 1);
        assert!(data.edges.is_empty());
        assert_eq!(data.layout, MindmapLayout::galaxy());
    }

    #[test]
    fn missing_ids_get_positional_names() {
        let graph: RelationshipGraphResponse = serde_json::from_value(json!({
            "core": {"label": "x"},
            "topics": [{"label": "A", "pages": [{"title": "p"}]}]
        }))
        .unwrap();
        let data = build_galaxy(&graph, &HashMap::new());
        assert_eq!(data.nodes[1].id, "topic-0");
        assert_eq!(data.nodes[2].id, "topic-0-page-0");
    }

    fn graph_strategy() -> impl Strategy<Value = RelationshipGraphResponse> {
        let page = ("[a-z]{0,3}", "[a-z ]{0,8}", 0.0f64..1.0)
            .prop_map(|(url_id, title, relevance)| TopicPage { url_id, title, relevance });
        let topic = ("[a-z]{1,3}", prop::collection::vec(page, 0..5)).prop_map(|(id, pages)| Topic {
            id,
            label: "topic".into(),
            keywords: vec!["k".into()],
            description: String::new(),
            pages,
        });
        prop::collection::vec(topic, 0..6).prop_map(|topics| RelationshipGraphResponse {
            core: CoreTheme {
                label: "core".into(),
                description: "d".into(),
            },
            topics,
            connections: vec![],
        })
    }

    proptest! {
        #[test]
        fn layout_is_byte_deterministic(graph in graph_strategy(), dur in 0i64..1_000_000) {
            let mut durations = HashMap::new();
            for t in &graph.topics {
                for p in &t.pages {
                    durations.insert(p.url_id.clone(), dur);
                }
            }
            let a = serde_json::to_vec(&build_galaxy(&graph, &durations)).unwrap();
            let b = serde_json::to_vec(&build_galaxy(&graph, &durations)).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
