use chrono::{DateTime, Duration, Utc};
use mission_core::models::{
    DiffOperation, IssueCode, MetadataPatch, Mission, MissionConnection, MissionNode,
    MissionStatus, Position, RetryPolicy,
};
use mission_domain::{apply_diff, check_integrity, derive_operations};
use mission_testing_utils::{utc, MissionBuilder, NodeBuilder};
use serde_json::json;

fn now() -> DateTime<Utc> {
    utc("2026-05-04T09:00:00Z")
}

fn trigger_output_mission() -> Mission {
    MissionBuilder::new("m1", "tenant-a")
        .with_version(7)
        .with_timestamps(now() - Duration::days(1))
        .with_node(NodeBuilder::new("trigger", "trigger.manual").build())
        .with_node(NodeBuilder::new("output", "output.chat").build())
        .with_connection("trigger-output", "trigger", "output")
        .build()
}

/// 比较时忽略版本、时间戳和节点/连接的排列顺序
fn normalized(mut mission: Mission) -> Mission {
    mission.version = 0;
    mission.updated_at = mission.created_at;
    mission.nodes.sort_by(|a, b| a.id.cmp(&b.id));
    mission.connections.sort_by(|a, b| a.id.cmp(&b.id));
    mission
}

#[test]
fn test_add_node_and_connection_with_matching_version() {
    let mission = trigger_output_mission();
    let operations = vec![
        DiffOperation::AddNode {
            node: NodeBuilder::new("summarize", "action.summarize").build(),
        },
        DiffOperation::AddConnection {
            connection: MissionConnection::new("output-summarize", "output", "summarize"),
        },
    ];

    let result = apply_diff(&mission, &operations, Some(7), now());

    assert!(result.ok);
    assert_eq!(result.applied_count, 2);
    assert!(result.issues.is_empty());
    let next = result.mission.unwrap();
    assert_eq!(next.version, 8);
    assert_eq!(next.nodes.len(), 3);
    assert_eq!(next.connections.len(), 2);
    assert_eq!(next.updated_at, now());
    assert!(check_integrity(&next).is_empty());
}

#[test]
fn test_stale_expected_version_is_rejected_without_touching_graph() {
    let mission = trigger_output_mission();
    let original = mission.clone();
    let operations = vec![DiffOperation::RemoveNode {
        node_id: "trigger".to_string(),
    }];

    let result = apply_diff(&mission, &operations, Some(6), now());

    assert!(!result.ok);
    assert!(result.mission.is_none());
    assert_eq!(result.applied_count, 0);
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].code, IssueCode::VersionConflict);
    assert!(result.is_version_conflict());
    assert_eq!(mission, original);
}

#[test]
fn test_missing_expected_version_skips_gate() {
    let mission = trigger_output_mission();
    let result = apply_diff(&mission, &[], None, now());
    assert!(result.ok);
    assert_eq!(result.mission.unwrap().version, 8);
}

#[test]
fn test_zero_version_bumps_to_one() {
    let mut mission = trigger_output_mission();
    mission.version = 0;
    let result = apply_diff(&mission, &[], None, now());
    assert_eq!(result.mission.unwrap().version, 1);
}

#[test]
fn test_invalid_connection_fails_regardless_of_position_in_batch() {
    let mission = trigger_output_mission();
    let dangling = DiffOperation::AddConnection {
        connection: MissionConnection::new("ghost", "output", "missing"),
    };
    let benign = DiffOperation::MoveNode {
        node_id: "trigger".to_string(),
        position: Position::new(10.0, 20.0),
    };

    for operations in [
        vec![dangling.clone(), benign.clone()],
        vec![benign.clone(), dangling.clone()],
    ] {
        let result = apply_diff(&mission, &operations, None, now());
        assert!(!result.ok);
        assert!(result.mission.is_none());
        assert_eq!(result.applied_count, 1);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].code, IssueCode::ConnectionTargetInvalid);
    }
}

#[test]
fn test_connection_with_both_endpoints_missing_reports_both() {
    let mission = trigger_output_mission();
    let operations = vec![DiffOperation::AddConnection {
        connection: MissionConnection::new("ghost", "nope", "missing"),
    }];
    let result = apply_diff(&mission, &operations, None, now());

    let codes: Vec<IssueCode> = result.issues.iter().map(|i| i.code).collect();
    assert_eq!(
        codes,
        vec![
            IssueCode::ConnectionSourceInvalid,
            IssueCode::ConnectionTargetInvalid
        ]
    );
    assert!(result
        .issues
        .iter()
        .all(|issue| issue.operation_index == Some(0)));
}

#[test]
fn test_connection_to_node_added_earlier_in_batch_is_valid() {
    let mission = trigger_output_mission();
    let operations = vec![
        DiffOperation::AddNode {
            node: NodeBuilder::new("archive", "output.archive").build(),
        },
        DiffOperation::AddConnection {
            connection: MissionConnection::new("trigger-archive", "trigger", "archive"),
        },
    ];
    assert!(apply_diff(&mission, &operations, None, now()).ok);
}

#[test]
fn test_failing_operation_does_not_stop_batch() {
    let mission = trigger_output_mission();
    let operations = vec![
        DiffOperation::RemoveNode {
            node_id: "missing".to_string(),
        },
        DiffOperation::AddNode {
            node: NodeBuilder::new("", "action.prompt").build(),
        },
        DiffOperation::AddNode {
            node: NodeBuilder::new("trigger", "trigger.manual").build(),
        },
        DiffOperation::RemoveConnection {
            connection_id: "missing".to_string(),
        },
        DiffOperation::UpdateNode {
            node_id: "missing".to_string(),
            patch: serde_json::Map::new(),
        },
    ];

    let result = apply_diff(&mission, &operations, None, now());

    let codes: Vec<(Option<usize>, IssueCode)> = result
        .issues
        .iter()
        .map(|i| (i.operation_index, i.code))
        .collect();
    assert_eq!(
        codes,
        vec![
            (Some(0), IssueCode::NodeNotFound),
            (Some(1), IssueCode::NodeIdMissing),
            (Some(2), IssueCode::NodeDuplicate),
            (Some(3), IssueCode::ConnectionNotFound),
            (Some(4), IssueCode::NodeNotFound),
        ]
    );
    assert_eq!(result.applied_count, 0);
    assert_eq!(result.issues[1].path, "operations[1].node.id");
}

#[test]
fn test_remove_node_cascades_connections() {
    let mission = MissionBuilder::new("m1", "tenant-a").with_linear_graph().build();
    let operations = vec![DiffOperation::RemoveNode {
        node_id: "action".to_string(),
    }];

    let next = apply_diff(&mission, &operations, None, now()).mission.unwrap();

    assert_eq!(next.nodes.len(), 2);
    assert!(next.connections.is_empty());
}

#[test]
fn test_cascaded_connection_cannot_be_removed_again() {
    let mission = trigger_output_mission();
    let operations = vec![
        DiffOperation::RemoveNode {
            node_id: "output".to_string(),
        },
        DiffOperation::RemoveConnection {
            connection_id: "trigger-output".to_string(),
        },
    ];
    let result = apply_diff(&mission, &operations, None, now());
    assert!(!result.ok);
    assert_eq!(result.issues[0].code, IssueCode::ConnectionNotFound);
    assert_eq!(result.issues[0].operation_index, Some(1));
}

#[test]
fn test_update_node_cannot_change_id_or_type() {
    let mission = trigger_output_mission();
    let patch = json!({"id": "hijack", "type": "action.shell", "channel": "telegram"});
    let operations = vec![DiffOperation::UpdateNode {
        node_id: "output".to_string(),
        patch: patch.as_object().cloned().unwrap(),
    }];

    let next = apply_diff(&mission, &operations, None, now()).mission.unwrap();
    let node = next.node("output").unwrap();
    assert_eq!(node.node_type, "output.chat");
    assert_eq!(node.attribute_str("channel"), Some("telegram"));
    assert!(next.node("hijack").is_none());
}

#[test]
fn test_integrity_pass_rejects_preexisting_duplicates() {
    let mut mission = trigger_output_mission();
    mission.nodes.push(MissionNode::new("trigger", "trigger.manual"));

    let result = apply_diff(&mission, &[], None, now());

    assert!(!result.ok);
    assert!(result
        .issues
        .iter()
        .any(|issue| issue.code == IssueCode::IntegrityDuplicateNode && issue.operation_index.is_none()));
}

#[test]
fn test_metadata_update_touches_only_whitelisted_fields() {
    let mission = trigger_output_mission();
    let operations = vec![DiffOperation::UpdateMissionMetadata {
        patch: MetadataPatch {
            label: Some("Morning brief".to_string()),
            status: Some(MissionStatus::Paused),
            integration: Some(Some(json!({"provider": "gmail"}))),
            ..MetadataPatch::default()
        },
    }];

    let next = apply_diff(&mission, &operations, None, now()).mission.unwrap();

    assert_eq!(next.label, "Morning brief");
    assert_eq!(next.status, MissionStatus::Paused);
    assert_eq!(next.integration, Some(json!({"provider": "gmail"})));
    assert_eq!(next.description, mission.description);
    assert_eq!(next.nodes, mission.nodes);
}

#[test]
fn test_metadata_patch_ignores_unknown_fields_when_decoded() {
    let operation: DiffOperation = serde_json::from_value(json!({
        "type": "updateMissionMetadata",
        "patch": {"label": "x", "version": 99, "runCount": 5}
    }))
    .unwrap();
    let mission = trigger_output_mission();
    let next = apply_diff(&mission, &[operation], None, now()).mission.unwrap();
    assert_eq!(next.label, "x");
    assert_eq!(next.version, 8);
    assert_eq!(next.run_count, 0);
}

#[test]
fn test_operations_decode_from_tagged_json() {
    let operations: Vec<DiffOperation> = serde_json::from_value(json!([
        {"type": "addNode", "node": {"id": "n1", "type": "action.prompt", "prompt": "hi"}},
        {"type": "moveNode", "nodeId": "n1", "position": {"x": 1.0, "y": 2.0}},
        {"type": "addConnection", "connection": {
            "id": "c9", "sourceNodeId": "trigger", "sourcePort": "out",
            "targetNodeId": "n1", "targetPort": "in"
        }}
    ]))
    .unwrap();

    let mission = trigger_output_mission();
    let result = apply_diff(&mission, &operations, Some(7), now());
    assert!(result.ok, "{:?}", result.issues);
    let next = result.mission.unwrap();
    assert_eq!(next.node("n1").unwrap().position, Position::new(1.0, 2.0));
    assert_eq!(next.node("n1").unwrap().attribute_str("prompt"), Some("hi"));
}

#[test]
fn test_derive_then_apply_reproduces_target() {
    let current = MissionBuilder::new("m1", "tenant-a")
        .with_version(3)
        .with_timestamps(now() - Duration::days(2))
        .with_node(NodeBuilder::daily_trigger("trigger", "08:00").build())
        .with_node(
            NodeBuilder::new("action", "action.prompt")
                .with_attribute("prompt", json!("weather"))
                .with_attribute("model", json!("small"))
                .build(),
        )
        .with_node(NodeBuilder::new("output", "output.chat").build())
        .with_node(NodeBuilder::new("legacy", "output.email").build())
        .with_connection("c1", "trigger", "action")
        .with_connection("c2", "action", "output")
        .with_connection("c3", "action", "legacy")
        .build();

    let mut next = current.clone();
    next.label = "Weather digest".to_string();
    next.tags = vec!["daily".to_string()];
    next.settings.retry = Some(RetryPolicy {
        max_retries: Some(1),
        ..RetryPolicy::default()
    });
    next.nodes.retain(|n| n.id != "legacy");
    next.connections.retain(|c| c.id != "c3");
    {
        let action = next.nodes.iter_mut().find(|n| n.id == "action").unwrap();
        action.position = Position::new(100.0, 40.0);
        action.attributes.insert("prompt".to_string(), json!("weather and news"));
        action.attributes.remove("model");
    }
    {
        // 类型变化按删除 + 新增处理
        let output = next.nodes.iter_mut().find(|n| n.id == "output").unwrap();
        output.node_type = "output.telegram".to_string();
        output.attributes.insert("chatId".to_string(), json!("42"));
    }
    next.nodes.push(NodeBuilder::new("audit", "output.log").build());
    next.connections.push(MissionConnection::new("c4", "action", "audit"));
    if let Some(c1) = next.connections.iter_mut().find(|c| c.id == "c1") {
        c1.target_port = "prompt".to_string();
    }

    let operations = derive_operations(&current, &next);
    let result = apply_diff(&current, &operations, Some(3), now());

    assert!(result.ok, "{:?}", result.issues);
    let applied = result.mission.unwrap();
    assert_eq!(applied.version, 4);
    assert_eq!(normalized(applied), normalized(next));
}

#[test]
fn test_null_attributes_are_treated_as_absent() {
    let current = MissionBuilder::new("m1", "tenant-a")
        .with_version(2)
        .with_node(
            NodeBuilder::new("action", "action.prompt")
                .with_attribute("prompt", json!("weather"))
                .with_attribute("model", json!("small"))
                .build(),
        )
        .build();

    // 客户端整文档保存时把 model 置为 null
    let node: MissionNode = serde_json::from_value(json!({
        "id": "action",
        "type": "action.prompt",
        "prompt": "weather",
        "model": null,
        "channel": null
    }))
    .unwrap();
    assert!(!node.attributes.contains_key("model"));
    assert!(!node.attributes.contains_key("channel"));

    let mut next = current.clone();
    next.nodes = vec![node];

    let operations = derive_operations(&current, &next);
    let result = apply_diff(&current, &operations, Some(2), now());
    assert!(result.ok, "{:?}", result.issues);
    assert_eq!(normalized(result.mission.unwrap()), normalized(next));

    // 在内存中直接写入的 null 同样按不存在处理
    let mut in_memory = current.clone();
    in_memory.nodes[0]
        .attributes
        .insert("model".to_string(), serde_json::Value::Null);
    let operations = derive_operations(&current, &in_memory);
    let applied = apply_diff(&current, &operations, Some(2), now()).mission.unwrap();
    assert!(applied.node("action").unwrap().attribute_str("model").is_none());
    assert_eq!(
        applied.node("action").unwrap().attributes,
        in_memory.nodes[0].clone().without_null_attributes().attributes
    );
}

#[test]
fn test_derive_orders_operations_by_kind() {
    let current = trigger_output_mission();
    let mut next = current.clone();
    next.description = "changed".to_string();
    next.nodes.retain(|n| n.id != "output");
    next.connections.clear();
    next.nodes.push(NodeBuilder::new("email", "output.email").build());
    next.nodes[0].position = Position::new(5.0, 5.0);
    next.connections
        .push(MissionConnection::new("trigger-email", "trigger", "email"));

    let kinds: Vec<&str> = derive_operations(&current, &next)
        .iter()
        .map(DiffOperation::kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            "removeConnection",
            "removeNode",
            "addNode",
            "moveNode",
            "addConnection",
            "updateMissionMetadata"
        ]
    );
}

#[test]
fn test_changed_connection_is_replaced_not_patched() {
    let current = trigger_output_mission();
    let mut next = current.clone();
    next.connections[0].source_port = "alt".to_string();

    let operations = derive_operations(&current, &next);
    assert_eq!(
        operations,
        vec![
            DiffOperation::RemoveConnection {
                connection_id: "trigger-output".to_string()
            },
            DiffOperation::AddConnection {
                connection: next.connections[0].clone()
            },
        ]
    );
}

#[test]
fn test_metadata_op_carries_full_values() {
    let current = trigger_output_mission();
    let mut next = current.clone();
    next.label = "new".to_string();

    let operations = derive_operations(&current, &next);
    let Some(DiffOperation::UpdateMissionMetadata { patch }) = operations.last() else {
        panic!("expected a metadata operation, got {operations:?}");
    };
    assert_eq!(patch.label.as_deref(), Some("new"));
    assert_eq!(patch.description.as_deref(), Some(""));
    assert_eq!(patch.status, Some(MissionStatus::Active));
    assert_eq!(patch.tags, Some(Vec::new()));
    assert_eq!(patch.integration, Some(None));
}
