//! Test data builders for missions, nodes and schedules

use chrono::{DateTime, Utc};
use mission_core::models::{
    Mission, MissionConnection, MissionNode, MissionSchedule, MissionStatus, Position,
    RetryPolicy, TriggerSpec, SCHEDULE_TRIGGER_NODE_TYPE,
};
use serde_json::Value;

/// Builder for creating test Mission documents
pub struct MissionBuilder {
    mission: Mission,
}

impl MissionBuilder {
    pub fn new(id: &str, tenant_id: &str) -> Self {
        Self {
            mission: Mission::new(id, tenant_id, Utc::now()),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.mission.label = label.to_string();
        self
    }

    pub fn with_status(mut self, status: MissionStatus) -> Self {
        self.mission.status = status;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.mission.version = version;
        self
    }

    pub fn with_node(mut self, node: MissionNode) -> Self {
        self.mission.nodes.push(node);
        self
    }

    pub fn with_connection(mut self, id: &str, source: &str, target: &str) -> Self {
        self.mission
            .connections
            .push(MissionConnection::new(id, source, target));
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.mission.settings.timezone = Some(timezone.to_string());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.mission.settings.retry = Some(retry);
        self
    }

    pub fn with_timestamps(mut self, at: DateTime<Utc>) -> Self {
        self.mission.created_at = at;
        self.mission.updated_at = at;
        self
    }

    /// Three nodes wired `trigger -> action -> output`
    pub fn with_linear_graph(self) -> Self {
        self.with_node(NodeBuilder::new("trigger", "trigger.manual").build())
            .with_node(NodeBuilder::new("action", "action.prompt").build())
            .with_node(NodeBuilder::new("output", "output.chat").build())
            .with_connection("c1", "trigger", "action")
            .with_connection("c2", "action", "output")
    }

    pub fn build(self) -> Mission {
        self.mission
    }
}

/// Builder for creating test graph nodes
pub struct NodeBuilder {
    node: MissionNode,
}

impl NodeBuilder {
    pub fn new(id: &str, node_type: &str) -> Self {
        Self {
            node: MissionNode::new(id, node_type),
        }
    }

    /// A daily schedule trigger firing at `time` (`HH:MM`)
    pub fn daily_trigger(id: &str, time: &str) -> Self {
        Self::new(id, SCHEDULE_TRIGGER_NODE_TYPE)
            .with_attribute("triggerMode", Value::from("daily"))
            .with_attribute("triggerTime", Value::from(time))
    }

    pub fn interval_trigger(id: &str, minutes: u32) -> Self {
        Self::new(id, SCHEDULE_TRIGGER_NODE_TYPE)
            .with_attribute("triggerMode", Value::from("interval"))
            .with_attribute("triggerIntervalMinutes", Value::from(minutes))
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.node.position = Position::new(x, y);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.node.attributes.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> MissionNode {
        self.node
    }
}

/// Builder for creating test schedules
pub struct ScheduleBuilder {
    schedule: MissionSchedule,
}

impl ScheduleBuilder {
    /// Daily 08:00 UTC schedule
    pub fn new(id: &str, tenant_id: &str, mission_id: &str) -> Self {
        Self {
            schedule: MissionSchedule::new(
                id,
                tenant_id,
                mission_id,
                TriggerSpec::daily("08:00"),
                Utc::now(),
            ),
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerSpec) -> Self {
        self.schedule.trigger = trigger;
        self
    }

    pub fn daily_at(mut self, time: &str) -> Self {
        self.schedule.trigger = TriggerSpec::daily(time);
        self
    }

    pub fn every_minutes(mut self, minutes: u32) -> Self {
        self.schedule.trigger = TriggerSpec::interval(minutes);
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.schedule.trigger.timezone = timezone.to_string();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.schedule.enabled = enabled;
        self
    }

    pub fn with_last_sent_local_date(mut self, date: &str) -> Self {
        self.schedule.last_sent_local_date = Some(date.to_string());
        self
    }

    pub fn build(self) -> MissionSchedule {
        self.schedule
    }
}
