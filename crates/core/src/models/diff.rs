use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::mission::{MissionConnection, MissionNode, MissionSettings, MissionStatus, Position};

/// 图变更操作
///
/// 操作是修改任务文档的唯一途径；整文档覆盖会先被转换成操作序列再执行。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiffOperation {
    #[serde(rename_all = "camelCase")]
    AddNode { node: MissionNode },
    #[serde(rename_all = "camelCase")]
    RemoveNode { node_id: String },
    /// 浅层 JSON merge patch；值为 `null` 表示删除该属性，`id`/`type` 会被忽略
    #[serde(rename_all = "camelCase")]
    UpdateNode {
        node_id: String,
        patch: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    MoveNode { node_id: String, position: Position },
    #[serde(rename_all = "camelCase")]
    AddConnection { connection: MissionConnection },
    #[serde(rename_all = "camelCase")]
    RemoveConnection { connection_id: String },
    #[serde(rename_all = "camelCase")]
    UpdateMissionMetadata { patch: MetadataPatch },
}

impl DiffOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            DiffOperation::AddNode { .. } => "addNode",
            DiffOperation::RemoveNode { .. } => "removeNode",
            DiffOperation::UpdateNode { .. } => "updateNode",
            DiffOperation::MoveNode { .. } => "moveNode",
            DiffOperation::AddConnection { .. } => "addConnection",
            DiffOperation::RemoveConnection { .. } => "removeConnection",
            DiffOperation::UpdateMissionMetadata { .. } => "updateMissionMetadata",
        }
    }
}

/// 元数据白名单；未列出的字段在反序列化时直接丢弃
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MissionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<MissionSettings>,
    /// 外层 `Some(None)` 表示清空
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    pub integration: Option<Option<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_ids: Option<Vec<String>>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        *self == MetadataPatch::default()
    }
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S>(value: &Option<Option<Value>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<Value>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Some(Option::<Value>::deserialize(deserializer)?))
    }
}

/// 校验问题代码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    VersionConflict,
    NodeIdMissing,
    NodeDuplicate,
    NodeNotFound,
    ConnectionIdMissing,
    ConnectionDuplicate,
    ConnectionNotFound,
    ConnectionSourceInvalid,
    ConnectionTargetInvalid,
    IntegrityDuplicateNode,
    IntegrityDuplicateConnection,
    IntegrityDanglingSource,
    IntegrityDanglingTarget,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::VersionConflict => "version_conflict",
            IssueCode::NodeIdMissing => "node_id_missing",
            IssueCode::NodeDuplicate => "node_duplicate",
            IssueCode::NodeNotFound => "node_not_found",
            IssueCode::ConnectionIdMissing => "connection_id_missing",
            IssueCode::ConnectionDuplicate => "connection_duplicate",
            IssueCode::ConnectionNotFound => "connection_not_found",
            IssueCode::ConnectionSourceInvalid => "connection_source_invalid",
            IssueCode::ConnectionTargetInvalid => "connection_target_invalid",
            IssueCode::IntegrityDuplicateNode => "integrity_duplicate_node",
            IssueCode::IntegrityDuplicateConnection => "integrity_duplicate_connection",
            IssueCode::IntegrityDanglingSource => "integrity_dangling_source",
            IssueCode::IntegrityDanglingTarget => "integrity_dangling_target",
        }
    }
}

/// 结构化的校验问题，调用方据此向用户准确展示失败原因
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiffIssue {
    pub code: IssueCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_index: Option<usize>,
    pub path: String,
    pub message: String,
}

impl DiffIssue {
    pub fn new(
        code: IssueCode,
        operation_index: Option<usize>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            operation_index,
            path: path.into(),
            message: message.into(),
        }
    }
}
