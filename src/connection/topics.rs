//! Topic layout under `<prefix>/doorbell-mqtt/<instance>`

pub const STATUS: &str = "status";
pub const AVAILABILITY: &str = "availability";
pub const LAST_ERROR: &str = "last_error";
pub const ACTIVE_PROFILE: &str = "active_profile";
pub const LAST_APPLIED: &str = "last_applied";
pub const PRESET_SELECTED: &str = "preset/selected";
pub const CUSTOM_DIRECTORY: &str = "custom/directory";
pub const DOWNLOAD_LAST_PATH: &str = "download/last_path";
pub const DOWNLOAD_LAST_TIMESTAMP: &str = "download/last_timestamp";
pub const DOWNLOAD_ATTRIBUTES: &str = "download/attributes";

pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    instance: String,
    base: String,
}

impl Topics {
    pub fn new(prefix: &str, instance: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            instance: instance.to_string(),
            base: format!("{prefix}/doorbell-mqtt/{instance}"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Full topic for a suffix relative to the base
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.base, suffix)
    }

    pub fn status(&self) -> String {
        self.topic(STATUS)
    }

    pub fn availability(&self) -> String {
        self.topic(AVAILABILITY)
    }

    pub fn last_error(&self) -> String {
        self.topic(LAST_ERROR)
    }

    /// Command topic, `<base>/cmd/<name>`
    pub fn command(&self, name: &str) -> String {
        format!("{}/cmd/{}", self.base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let topics = Topics::new("chrishansentech", "front");

        assert_eq!(topics.base(), "chrishansentech/doorbell-mqtt/front");
        assert_eq!(topics.status(), "chrishansentech/doorbell-mqtt/front/status");
        assert_eq!(
            topics.availability(),
            "chrishansentech/doorbell-mqtt/front/availability"
        );
        assert_eq!(
            topics.command("preset_set"),
            "chrishansentech/doorbell-mqtt/front/cmd/preset_set"
        );
        assert_eq!(
            topics.topic(DOWNLOAD_ATTRIBUTES),
            "chrishansentech/doorbell-mqtt/front/download/attributes"
        );
    }
}
