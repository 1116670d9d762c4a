//! 快照差量推导
//!
//! 旧客户端仍然整文档保存，这里把 `current → next` 转换成等价的操作序列，
//! 让所有写入都经过同一条校验路径。输出顺序固定：
//!
//! 1. `removeConnection`（删除的、字段变化的、触及被替换节点的连接）
//! 2. `removeNode`
//! 3. `addNode`
//! 4. `moveNode`
//! 5. `updateNode`
//! 6. `addConnection`
//! 7. `updateMissionMetadata`（携带全部被跟踪字段的新值）
//!
//! 连接不可打补丁，任何字段变化都表示为删除 + 新增；
//! 下游依赖连接 id 的变动来失效缓存，因此保持这种粒度。
//! 节点类型变化无法用 `updateNode` 表达（更新会保留类型），按删除 + 新增处理。

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use mission_core::models::{
    DiffOperation, MetadataPatch, Mission, MissionConnection, MissionNode,
};

pub fn derive_operations(current: &Mission, next: &Mission) -> Vec<DiffOperation> {
    let current_nodes = index_nodes(&current.nodes);
    let next_nodes = index_nodes(&next.nodes);
    let current_connections = index_connections(&current.connections);
    let next_connections = index_connections(&next.connections);

    let replaced: HashSet<&str> = next_nodes
        .iter()
        .filter_map(|(id, node)| {
            current_nodes
                .get(id)
                .filter(|old| old.node_type != node.node_type)
                .map(|_| *id)
        })
        .collect();
    let touches_replaced = |c: &MissionConnection| {
        replaced.contains(c.source_node_id.as_str()) || replaced.contains(c.target_node_id.as_str())
    };

    let mut operations = Vec::new();

    for connection in &current.connections {
        let keep = matches!(
            next_connections.get(connection.id.as_str()),
            Some(candidate) if *candidate == connection
        );
        if !keep || touches_replaced(connection) {
            operations.push(DiffOperation::RemoveConnection {
                connection_id: connection.id.clone(),
            });
        }
    }

    for node in &current.nodes {
        if !next_nodes.contains_key(node.id.as_str()) || replaced.contains(node.id.as_str()) {
            operations.push(DiffOperation::RemoveNode {
                node_id: node.id.clone(),
            });
        }
    }

    for node in &next.nodes {
        if !current_nodes.contains_key(node.id.as_str()) || replaced.contains(node.id.as_str()) {
            operations.push(DiffOperation::AddNode { node: node.clone() });
        }
    }

    let surviving: Vec<(&MissionNode, &MissionNode)> = next
        .nodes
        .iter()
        .filter(|node| !replaced.contains(node.id.as_str()))
        .filter_map(|node| current_nodes.get(node.id.as_str()).map(|old| (*old, node)))
        .collect();

    for (old, new) in &surviving {
        if old.position != new.position {
            operations.push(DiffOperation::MoveNode {
                node_id: new.id.clone(),
                position: new.position,
            });
        }
    }

    for (old, new) in &surviving {
        let patch = attribute_patch(&old.attributes, &new.attributes);
        if !patch.is_empty() {
            operations.push(DiffOperation::UpdateNode {
                node_id: new.id.clone(),
                patch,
            });
        }
    }

    for connection in &next.connections {
        let unchanged = matches!(
            current_connections.get(connection.id.as_str()),
            Some(old) if *old == connection
        );
        if !unchanged || touches_replaced(connection) {
            operations.push(DiffOperation::AddConnection {
                connection: connection.clone(),
            });
        }
    }

    if metadata_changed(current, next) {
        operations.push(DiffOperation::UpdateMissionMetadata {
            patch: full_metadata(next),
        });
    }

    operations
}

fn index_nodes(nodes: &[MissionNode]) -> HashMap<&str, &MissionNode> {
    let mut index = HashMap::with_capacity(nodes.len());
    for node in nodes {
        index.entry(node.id.as_str()).or_insert(node);
    }
    index
}

fn index_connections(connections: &[MissionConnection]) -> HashMap<&str, &MissionConnection> {
    let mut index = HashMap::with_capacity(connections.len());
    for connection in connections {
        index.entry(connection.id.as_str()).or_insert(connection);
    }
    index
}

/// 新增或变化的属性取新值，被删除的属性置为 `null`
///
/// 值为 `null` 的属性按不存在处理，与差量应用时 `null` 表示删除保持一致。
fn attribute_patch(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let present = |map: &Map<String, Value>, key: &str| map.get(key).filter(|v| !v.is_null()).cloned();

    let mut patch = Map::new();
    for (key, value) in new {
        if !value.is_null() && present(old, key).as_ref() != Some(value) {
            patch.insert(key.clone(), value.clone());
        }
    }
    for key in old.keys() {
        if present(old, key).is_some() && present(new, key).is_none() {
            patch.insert(key.clone(), Value::Null);
        }
    }
    patch
}

fn metadata_changed(current: &Mission, next: &Mission) -> bool {
    current.label != next.label
        || current.description != next.description
        || current.status != next.status
        || current.tags != next.tags
        || current.settings != next.settings
        || current.integration != next.integration
        || current.chat_ids != next.chat_ids
}

fn full_metadata(mission: &Mission) -> MetadataPatch {
    MetadataPatch {
        label: Some(mission.label.clone()),
        description: Some(mission.description.clone()),
        status: Some(mission.status),
        tags: Some(mission.tags.clone()),
        settings: Some(mission.settings.clone()),
        integration: Some(mission.integration.clone()),
        chat_ids: Some(mission.chat_ids.clone()),
    }
}
