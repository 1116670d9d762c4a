use std::collections::HashSet;

use mission_core::models::{DiffIssue, IssueCode, Mission};

/// 整图完整性检查
///
/// 节点 id 唯一、连接 id 唯一、每条连接的两端都指向存在的节点。
/// 返回的问题不关联具体操作（`operation_index` 为空）。
pub fn check_integrity(mission: &Mission) -> Vec<DiffIssue> {
    let mut issues = Vec::new();

    let mut node_ids = HashSet::with_capacity(mission.nodes.len());
    for (i, node) in mission.nodes.iter().enumerate() {
        if !node_ids.insert(node.id.as_str()) {
            issues.push(DiffIssue::new(
                IssueCode::IntegrityDuplicateNode,
                None,
                format!("nodes[{i}].id"),
                format!("节点 id 重复: {}", node.id),
            ));
        }
    }

    let mut connection_ids = HashSet::with_capacity(mission.connections.len());
    for (i, connection) in mission.connections.iter().enumerate() {
        if !connection_ids.insert(connection.id.as_str()) {
            issues.push(DiffIssue::new(
                IssueCode::IntegrityDuplicateConnection,
                None,
                format!("connections[{i}].id"),
                format!("连接 id 重复: {}", connection.id),
            ));
        }
        if !node_ids.contains(connection.source_node_id.as_str()) {
            issues.push(DiffIssue::new(
                IssueCode::IntegrityDanglingSource,
                None,
                format!("connections[{i}].sourceNodeId"),
                format!(
                    "连接 {} 引用了不存在的源节点 {}",
                    connection.id, connection.source_node_id
                ),
            ));
        }
        if !node_ids.contains(connection.target_node_id.as_str()) {
            issues.push(DiffIssue::new(
                IssueCode::IntegrityDanglingTarget,
                None,
                format!("connections[{i}].targetNodeId"),
                format!(
                    "连接 {} 引用了不存在的目标节点 {}",
                    connection.id, connection.target_node_id
                ),
            ));
        }
    }

    issues
}
