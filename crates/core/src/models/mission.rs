use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::run_record::RunStatus;

/// 任务（mission）状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    #[default]
    Active,
    Paused,
    Draft,
    Archived,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Active => "active",
            MissionStatus::Paused => "paused",
            MissionStatus::Draft => "draft",
            MissionStatus::Archived => "archived",
        }
    }
}

/// 单个任务覆盖全局重试策略时使用的配置，最终仍会被调度器夹紧到合法范围
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MissionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// 其余未建模的设置项原样保留
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 图中的节点
///
/// `node_type` 决定节点行为（trigger / action / output ...），
/// 类型相关的属性（例如调度触发器的 `triggerMode`）平铺在 `attributes` 中。
/// 值为 `null` 的属性等同于不存在，反序列化时直接丢弃。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", from = "NodeDocument")]
pub struct MissionNode {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeDocument {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    position: Position,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl From<NodeDocument> for MissionNode {
    fn from(doc: NodeDocument) -> Self {
        MissionNode {
            id: doc.id,
            node_type: doc.node_type,
            position: doc.position,
            attributes: doc.attributes,
        }
        .without_null_attributes()
    }
}

impl MissionNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            attributes: Map::new(),
        }
    }

    pub fn without_null_attributes(mut self) -> Self {
        self.attributes.retain(|_, value| !value.is_null());
        self
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn is_schedule_trigger(&self) -> bool {
        self.node_type == SCHEDULE_TRIGGER_NODE_TYPE
    }
}

/// 携带 `triggerMode` 等调度属性的节点类型
pub const SCHEDULE_TRIGGER_NODE_TYPE: &str = "trigger.schedule";

/// 有向连接
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MissionConnection {
    #[serde(default)]
    pub id: String,
    pub source_node_id: String,
    #[serde(default)]
    pub source_port: String,
    pub target_node_id: String,
    #[serde(default)]
    pub target_port: String,
}

impl MissionConnection {
    pub fn new(
        id: impl Into<String>,
        source_node_id: impl Into<String>,
        target_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source_node_id.into(),
            source_port: "out".to_string(),
            target_node_id: target_node_id.into(),
            target_port: "in".to_string(),
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

/// 版本化的任务文档
///
/// 每次成功变更 `version` 恰好加一；携带过期 `expected_version` 的变更请求必须被拒绝。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: MissionStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub settings: MissionSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<Value>,
    #[serde(default)]
    pub chat_ids: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<MissionNode>,
    #[serde(default)]
    pub connections: Vec<MissionConnection>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            label: String::new(),
            description: String::new(),
            status: MissionStatus::Active,
            tags: Vec::new(),
            settings: MissionSettings::default(),
            integration: None,
            chat_ids: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            version: 1,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            last_run_at: None,
            last_run_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MissionStatus::Active
    }

    pub fn node(&self, node_id: &str) -> Option<&MissionNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn connection(&self, connection_id: &str) -> Option<&MissionConnection> {
        self.connections.iter().find(|c| c.id == connection_id)
    }

    pub fn schedule_trigger(&self) -> Option<&MissionNode> {
        self.nodes.iter().find(|n| n.is_schedule_trigger())
    }

    /// 提交一次成功的变更：版本号加一并刷新更新时间
    pub fn bump_version(&mut self, now: DateTime<Utc>) {
        self.version = (self.version + 1).max(1);
        self.updated_at = now;
    }
}
