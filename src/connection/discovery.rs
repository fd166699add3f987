//! Home Assistant MQTT discovery
//!
//! Every entity is described once in [`ENTITIES`]. The retained discovery
//! configs and the command routes are both derived from that table.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::publisher::{BusPublisher, PublishError, PublishMode};
use super::topics::{self, Topics};
use crate::command::CommandKind;
use crate::profiles::PresetTable;

const DISCOVERY_PREFIX: &str = "homeassistant";
const MANUFACTURER: &str = "ChrisHansenTech";
const MODEL: &str = "UniFi Doorbell MQTT Service";
const ORIGIN_URL: &str = "https://github.com/ChrisHansenTech/doorbell-mqtt-unifi";
const SW_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Options {
    None,
    PresetNames,
}

#[derive(Debug)]
pub struct Entity {
    pub component: &'static str,
    pub object_id: &'static str,
    pub name: &'static str,
    pub category: Option<&'static str>,
    pub state_topic: Option<&'static str>,
    pub command: Option<CommandKind>,
    pub icon: &'static str,
    pub value_template: Option<&'static str>,
    pub json_attributes_topic: Option<&'static str>,
    options: Options,
}

pub const ENTITIES: &[Entity] = &[
    Entity {
        component: "sensor",
        object_id: "status",
        name: "Status",
        category: Some("diagnostic"),
        state_topic: Some(topics::STATUS),
        command: None,
        icon: "mdi:information-outline",
        value_template: None,
        json_attributes_topic: None,
        options: Options::None,
    },
    Entity {
        component: "sensor",
        object_id: "last_error",
        name: "Last Error",
        category: Some("diagnostic"),
        state_topic: Some(topics::LAST_ERROR),
        command: None,
        icon: "mdi:alert-circle-outline",
        value_template: Some("{{ value_json.message }}"),
        json_attributes_topic: Some(topics::LAST_ERROR),
        options: Options::None,
    },
    Entity {
        component: "sensor",
        object_id: "active_profile",
        name: "Active Profile",
        category: None,
        state_topic: Some(topics::ACTIVE_PROFILE),
        command: None,
        icon: "mdi:badge-account",
        value_template: None,
        json_attributes_topic: None,
        options: Options::None,
    },
    Entity {
        component: "sensor",
        object_id: "last_applied",
        name: "Last Applied",
        category: Some("diagnostic"),
        state_topic: Some(topics::LAST_APPLIED),
        command: None,
        icon: "mdi:history",
        value_template: Some("{{ value_json.profileName }}"),
        json_attributes_topic: Some(topics::LAST_APPLIED),
        options: Options::None,
    },
    Entity {
        component: "select",
        object_id: "preset",
        name: "Preset",
        category: Some("config"),
        state_topic: Some(topics::PRESET_SELECTED),
        command: Some(CommandKind::PresetSet),
        icon: "mdi:calendar-star",
        value_template: None,
        json_attributes_topic: None,
        options: Options::PresetNames,
    },
    Entity {
        component: "text",
        object_id: "custom_directory",
        name: "Custom directory",
        category: Some("config"),
        state_topic: Some(topics::CUSTOM_DIRECTORY),
        command: Some(CommandKind::ApplyCustom),
        icon: "mdi:folder",
        value_template: None,
        json_attributes_topic: None,
        options: Options::None,
    },
    Entity {
        component: "button",
        object_id: "test_config",
        name: "Test Config",
        category: Some("config"),
        state_topic: None,
        command: Some(CommandKind::TestConfig),
        icon: "mdi:test-tube",
        value_template: None,
        json_attributes_topic: None,
        options: Options::None,
    },
    Entity {
        component: "button",
        object_id: "download_assets",
        name: "Asset Download",
        category: None,
        state_topic: None,
        command: Some(CommandKind::DownloadAssets),
        icon: "mdi:download",
        value_template: None,
        json_attributes_topic: None,
        options: Options::None,
    },
    Entity {
        component: "sensor",
        object_id: "last_download_path",
        name: "Last Asset Download",
        category: Some("diagnostic"),
        state_topic: Some(topics::DOWNLOAD_LAST_PATH),
        command: None,
        icon: "mdi:folder-arrow-down",
        value_template: None,
        json_attributes_topic: Some(topics::DOWNLOAD_ATTRIBUTES),
        options: Options::None,
    },
    Entity {
        component: "sensor",
        object_id: "last_download_timestamp",
        name: "Last Asset Download Time",
        category: Some("diagnostic"),
        state_topic: Some(topics::DOWNLOAD_LAST_TIMESTAMP),
        command: None,
        icon: "mdi:clock-outline",
        value_template: None,
        json_attributes_topic: None,
        options: Options::None,
    },
];

/// A retained discovery config ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: Value,
}

/// Entities that apply to this configuration.
///
/// The preset select is dropped when there are no presets, since Home
/// Assistant rejects a select without options.
fn active_entities(presets: &PresetTable) -> impl Iterator<Item = &'static Entity> + '_ {
    ENTITIES
        .iter()
        .filter(move |e| e.options != Options::PresetNames || !presets.is_empty())
}

/// Command topic -> command, for every entity that accepts commands
pub fn command_routes(topics: &Topics, presets: &PresetTable) -> Vec<(String, CommandKind)> {
    active_entities(presets)
        .filter_map(|e| e.command)
        .map(|kind| (topics.command(kind.topic_name()), kind))
        .collect()
}

pub fn discovery_messages(topics: &Topics, presets: &PresetTable) -> Vec<DiscoveryMessage> {
    if presets.is_empty() {
        warn!("[DISCOVERY] No presets configured; preset select not published");
    }

    active_entities(presets)
        .map(|entity| DiscoveryMessage {
            topic: format!(
                "{}/{}/{}_doorbell_mqtt_{}_{}/config",
                DISCOVERY_PREFIX,
                entity.component,
                topics.prefix(),
                topics.instance(),
                entity.object_id
            ),
            payload: entity_payload(entity, topics, presets),
        })
        .collect()
}

/// Publish every discovery config (retained)
pub fn publish_discovery(
    publisher: &dyn BusPublisher,
    topics: &Topics,
    presets: &PresetTable,
    mode: PublishMode,
) -> Result<usize, PublishError> {
    let messages = discovery_messages(topics, presets);
    for message in &messages {
        publisher.publish(
            &message.topic,
            message.payload.to_string().as_bytes(),
            true,
            mode,
        )?;
    }
    debug!("[DISCOVERY] Published {} entity configs", messages.len());
    Ok(messages.len())
}

fn is_default_instance(instance: &str) -> bool {
    instance.eq_ignore_ascii_case("default")
}

/// `front_door` -> `Front Door`
fn human_instance(instance: &str) -> String {
    instance
        .split(['_', '-'])
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_name(name: &str, instance: &str) -> String {
    if is_default_instance(instance) {
        name.to_string()
    } else {
        format!("{} ({})", name, human_instance(instance))
    }
}

fn unique_id(topics: &Topics, object_id: &str) -> String {
    if topics.instance() == "default" {
        format!("{}_doorbell_mqtt_{}", topics.prefix(), object_id)
    } else {
        format!(
            "{}_doorbell_mqtt_{}_{}",
            topics.prefix(),
            topics.instance(),
            object_id
        )
    }
}

fn entity_payload(entity: &Entity, topics: &Topics, presets: &PresetTable) -> Value {
    let mut root = Map::new();
    root.insert("name".into(), display_name(entity.name, topics.instance()).into());
    if let Some(category) = entity.category {
        root.insert("entity_category".into(), category.into());
    }

    let id = unique_id(topics, entity.object_id);
    root.insert("object_id".into(), id.clone().into());
    root.insert("unique_id".into(), id.into());

    if let Some(state) = entity.state_topic {
        root.insert("state_topic".into(), topics.topic(state).into());
    }
    root.insert("availability_topic".into(), topics.availability().into());
    if let Some(kind) = entity.command {
        root.insert(
            "command_topic".into(),
            topics.command(kind.topic_name()).into(),
        );
    }
    if entity.options == Options::PresetNames {
        root.insert("options".into(), presets.display_names().into());
    }

    root.insert("icon".into(), entity.icon.into());
    if let Some(template) = entity.value_template {
        root.insert("value_template".into(), template.into());
    }
    if let Some(attributes) = entity.json_attributes_topic {
        root.insert(
            "json_attributes_topic".into(),
            topics.topic(attributes).into(),
        );
    }

    root.insert(
        "device".into(),
        json!({
            "identifiers": format!("{}_doorbell_mqtt_{}", topics.prefix(), topics.instance()),
            "manufacturer": MANUFACTURER,
            "model": MODEL,
            "name": display_name(MODEL, topics.instance()),
            "sw_version": SW_VERSION,
        }),
    );
    root.insert(
        "origin".into(),
        json!({
            "name": MODEL,
            "sw_version": SW_VERSION,
            "url": ORIGIN_URL,
        }),
    );

    Value::Object(root)
}
