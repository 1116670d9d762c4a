//! # 差量应用引擎
//!
//! 在任务快照的副本上按顺序应用图变更操作，校验结果并推进版本号。
//!
//! - 携带 `expected_version` 且与当前版本不一致时立即返回 `version_conflict`，不触碰图
//! - 单个操作失败不会中断批次，后续操作继续尝试，调用方一次看到全部问题
//! - 所有操作成功后执行整图完整性检查，检查失败同样使整个调用失败
//! - 引擎是纯函数：持久化和操作日志由调用方负责
//!
//! 工作副本采用 arena 式存储：节点、连接放在带墓碑的槽位中，
//! 通过 id → 槽位索引和节点 → 连接邻接表完成查找与级联删除。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use mission_core::models::{
    DiffIssue, DiffOperation, IssueCode, MetadataPatch, Mission, MissionConnection, MissionNode,
    Position,
};

use crate::integrity::check_integrity;

/// `updateNode` 补丁中被忽略的保留键
const RESERVED_NODE_KEYS: [&str; 3] = ["id", "type", "position"];

/// 差量应用结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission: Option<Mission>,
    pub applied_count: usize,
    pub issues: Vec<DiffIssue>,
}

impl ApplyResult {
    pub fn conflict(expected: u64, actual: u64) -> Self {
        Self {
            ok: false,
            mission: None,
            applied_count: 0,
            issues: vec![DiffIssue::new(
                IssueCode::VersionConflict,
                None,
                "version",
                format!("期望版本 {expected}，当前版本 {actual}"),
            )],
        }
    }

    /// 版本冲突需要重新读取后再提交，与普通校验失败区分
    pub fn is_version_conflict(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.code == IssueCode::VersionConflict)
    }
}

/// 对任务快照应用一组操作
pub fn apply_diff(
    mission: &Mission,
    operations: &[DiffOperation],
    expected_version: Option<u64>,
    now: DateTime<Utc>,
) -> ApplyResult {
    if let Some(expected) = expected_version {
        if expected != mission.version {
            return ApplyResult::conflict(expected, mission.version);
        }
    }

    let mut draft = GraphDraft::from_mission(mission);
    let mut issues = Vec::new();
    let mut applied_count = 0;

    for (index, operation) in operations.iter().enumerate() {
        let before = issues.len();
        draft.apply(index, operation, &mut issues);
        if issues.len() == before {
            applied_count += 1;
        }
    }

    if !issues.is_empty() {
        return ApplyResult {
            ok: false,
            mission: None,
            applied_count,
            issues,
        };
    }

    let mut next = draft.into_mission();
    let integrity_issues = check_integrity(&next);
    if !integrity_issues.is_empty() {
        return ApplyResult {
            ok: false,
            mission: None,
            applied_count,
            issues: integrity_issues,
        };
    }

    next.bump_version(now);
    ApplyResult {
        ok: true,
        mission: Some(next),
        applied_count,
        issues,
    }
}

/// 可变的工作副本
struct GraphDraft {
    base: Mission,
    nodes: Vec<Option<MissionNode>>,
    node_index: HashMap<String, usize>,
    connections: Vec<Option<MissionConnection>>,
    connection_index: HashMap<String, usize>,
    adjacency: HashMap<String, HashSet<String>>,
}

impl GraphDraft {
    fn from_mission(mission: &Mission) -> Self {
        let mut base = mission.clone();
        let nodes: Vec<Option<MissionNode>> =
            std::mem::take(&mut base.nodes).into_iter().map(Some).collect();
        let connections: Vec<Option<MissionConnection>> = std::mem::take(&mut base.connections)
            .into_iter()
            .map(Some)
            .collect();

        // 重复 id 时保留第一次出现的槽位，完整性检查会报告重复
        let mut node_index = HashMap::new();
        for (slot, node) in nodes.iter().enumerate() {
            if let Some(node) = node {
                node_index.entry(node.id.clone()).or_insert(slot);
            }
        }

        let mut connection_index = HashMap::new();
        let mut adjacency: HashMap<String, HashSet<String>> = HashMap::new();
        for (slot, connection) in connections.iter().enumerate() {
            if let Some(connection) = connection {
                connection_index
                    .entry(connection.id.clone())
                    .or_insert(slot);
                link(&mut adjacency, connection);
            }
        }

        Self {
            base,
            nodes,
            node_index,
            connections,
            connection_index,
            adjacency,
        }
    }

    fn into_mission(self) -> Mission {
        let mut mission = self.base;
        mission.nodes = self.nodes.into_iter().flatten().collect();
        mission.connections = self.connections.into_iter().flatten().collect();
        mission
    }

    fn apply(&mut self, index: usize, operation: &DiffOperation, issues: &mut Vec<DiffIssue>) {
        match operation {
            DiffOperation::AddNode { node } => self.add_node(index, node, issues),
            DiffOperation::RemoveNode { node_id } => self.remove_node(index, node_id, issues),
            DiffOperation::UpdateNode { node_id, patch } => {
                self.update_node(index, node_id, patch, issues)
            }
            DiffOperation::MoveNode { node_id, position } => {
                self.move_node(index, node_id, *position, issues)
            }
            DiffOperation::AddConnection { connection } => {
                self.add_connection(index, connection, issues)
            }
            DiffOperation::RemoveConnection { connection_id } => {
                self.remove_connection(index, connection_id, issues)
            }
            DiffOperation::UpdateMissionMetadata { patch } => self.update_metadata(patch),
        }
    }

    fn add_node(&mut self, index: usize, node: &MissionNode, issues: &mut Vec<DiffIssue>) {
        if node.id.trim().is_empty() {
            issues.push(DiffIssue::new(
                IssueCode::NodeIdMissing,
                Some(index),
                format!("operations[{index}].node.id"),
                "节点缺少 id",
            ));
            return;
        }
        if self.node_index.contains_key(&node.id) {
            issues.push(DiffIssue::new(
                IssueCode::NodeDuplicate,
                Some(index),
                format!("operations[{index}].node.id"),
                format!("节点 {} 已存在", node.id),
            ));
            return;
        }
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(Some(node.clone().without_null_attributes()));
    }

    fn remove_node(&mut self, index: usize, node_id: &str, issues: &mut Vec<DiffIssue>) {
        let Some(slot) = self.node_index.remove(node_id) else {
            issues.push(node_not_found(index, node_id));
            return;
        };
        self.nodes[slot] = None;

        // 级联删除所有触及该节点的连接
        if let Some(connection_ids) = self.adjacency.remove(node_id) {
            for connection_id in connection_ids {
                self.drop_connection(&connection_id);
            }
        }
    }

    fn update_node(
        &mut self,
        index: usize,
        node_id: &str,
        patch: &Map<String, Value>,
        issues: &mut Vec<DiffIssue>,
    ) {
        let Some(node) = self.node_mut(node_id) else {
            issues.push(node_not_found(index, node_id));
            return;
        };
        for (key, value) in patch {
            if RESERVED_NODE_KEYS.contains(&key.as_str()) {
                continue;
            }
            if value.is_null() {
                node.attributes.remove(key);
            } else {
                node.attributes.insert(key.clone(), value.clone());
            }
        }
    }

    fn move_node(
        &mut self,
        index: usize,
        node_id: &str,
        position: Position,
        issues: &mut Vec<DiffIssue>,
    ) {
        match self.node_mut(node_id) {
            Some(node) => node.position = position,
            None => issues.push(node_not_found(index, node_id)),
        }
    }

    fn add_connection(
        &mut self,
        index: usize,
        connection: &MissionConnection,
        issues: &mut Vec<DiffIssue>,
    ) {
        if connection.id.trim().is_empty() {
            issues.push(DiffIssue::new(
                IssueCode::ConnectionIdMissing,
                Some(index),
                format!("operations[{index}].connection.id"),
                "连接缺少 id",
            ));
            return;
        }
        if self.connection_index.contains_key(&connection.id) {
            issues.push(DiffIssue::new(
                IssueCode::ConnectionDuplicate,
                Some(index),
                format!("operations[{index}].connection.id"),
                format!("连接 {} 已存在", connection.id),
            ));
            return;
        }

        let mut valid = true;
        if !self.node_index.contains_key(&connection.source_node_id) {
            issues.push(DiffIssue::new(
                IssueCode::ConnectionSourceInvalid,
                Some(index),
                format!("operations[{index}].connection.sourceNodeId"),
                format!("源节点 {} 不存在", connection.source_node_id),
            ));
            valid = false;
        }
        if !self.node_index.contains_key(&connection.target_node_id) {
            issues.push(DiffIssue::new(
                IssueCode::ConnectionTargetInvalid,
                Some(index),
                format!("operations[{index}].connection.targetNodeId"),
                format!("目标节点 {} 不存在", connection.target_node_id),
            ));
            valid = false;
        }
        if !valid {
            return;
        }

        self.connection_index
            .insert(connection.id.clone(), self.connections.len());
        link(&mut self.adjacency, connection);
        self.connections.push(Some(connection.clone()));
    }

    fn remove_connection(
        &mut self,
        index: usize,
        connection_id: &str,
        issues: &mut Vec<DiffIssue>,
    ) {
        if !self.drop_connection(connection_id) {
            issues.push(DiffIssue::new(
                IssueCode::ConnectionNotFound,
                Some(index),
                format!("operations[{index}].connectionId"),
                format!("连接 {connection_id} 不存在"),
            ));
        }
    }

    fn update_metadata(&mut self, patch: &MetadataPatch) {
        let mission = &mut self.base;
        if let Some(label) = &patch.label {
            mission.label = label.clone();
        }
        if let Some(description) = &patch.description {
            mission.description = description.clone();
        }
        if let Some(status) = patch.status {
            mission.status = status;
        }
        if let Some(tags) = &patch.tags {
            mission.tags = tags.clone();
        }
        if let Some(settings) = &patch.settings {
            mission.settings = settings.clone();
        }
        if let Some(integration) = &patch.integration {
            mission.integration = integration.clone();
        }
        if let Some(chat_ids) = &patch.chat_ids {
            mission.chat_ids = chat_ids.clone();
        }
    }

    fn node_mut(&mut self, node_id: &str) -> Option<&mut MissionNode> {
        let slot = *self.node_index.get(node_id)?;
        self.nodes[slot].as_mut()
    }

    /// 删除连接并维护邻接表，返回是否存在
    fn drop_connection(&mut self, connection_id: &str) -> bool {
        let Some(slot) = self.connection_index.remove(connection_id) else {
            return false;
        };
        if let Some(connection) = self.connections[slot].take() {
            for endpoint in [&connection.source_node_id, &connection.target_node_id] {
                if let Some(ids) = self.adjacency.get_mut(endpoint) {
                    ids.remove(connection_id);
                }
            }
        }
        true
    }
}

fn link(adjacency: &mut HashMap<String, HashSet<String>>, connection: &MissionConnection) {
    for endpoint in [&connection.source_node_id, &connection.target_node_id] {
        adjacency
            .entry(endpoint.clone())
            .or_default()
            .insert(connection.id.clone());
    }
}

fn node_not_found(index: usize, node_id: &str) -> DiffIssue {
    DiffIssue::new(
        IssueCode::NodeNotFound,
        Some(index),
        format!("operations[{index}].nodeId"),
        format!("节点 {node_id} 不存在"),
    )
}
