use std::collections::BTreeMap;

/// Per-world anti-xray ray-trace policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldPolicy {
    /// Ray-trace visibility for participants in this world
    #[serde(default = "default_true")]
    pub ray_trace: bool,
    /// Also probe the two third-person camera placements
    #[serde(default)]
    pub ray_trace_third_person: bool,
}

fn default_true() -> bool {
    true
}

impl Default for WorldPolicy {
    fn default() -> Self {
        Self {
            ray_trace: true,
            ray_trace_third_person: false,
        }
    }
}

/// World name -> policy. The `default` entry applies to worlds without their own entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WorldSettings(pub BTreeMap<String, WorldPolicy>);

impl WorldSettings {
    pub const DEFAULT_KEY: &'static str = "default";

    pub fn policy_for(&self, world_name: &str) -> WorldPolicy {
        self.0
            .get(world_name)
            .or_else(|| self.0.get(Self::DEFAULT_KEY))
            .copied()
            .unwrap_or_default()
    }

    pub fn with(mut self, world_name: &str, policy: WorldPolicy) -> Self {
        self.0.insert(world_name.to_string(), policy);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.0.contains_key(Self::DEFAULT_KEY) {
            return Err("worldSettings must contain a \"default\" entry".to_string());
        }
        if self.0.keys().any(|name| name.trim().is_empty()) {
            return Err("worldSettings keys must be non-empty world names".to_string());
        }
        Ok(())
    }
}

impl Default for WorldSettings {
    fn default() -> Self {
        let mut map = BTreeMap::new();
        map.insert(Self::DEFAULT_KEY.to_string(), WorldPolicy::default());
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_world_settings_are_valid() {
        assert!(WorldSettings::default().validate().is_ok());
    }

    #[test]
    fn missing_default_entry_invalid() {
        let settings = WorldSettings(BTreeMap::new());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn named_world_overrides_default() {
        let settings = WorldSettings::default().with(
            "nether",
            WorldPolicy {
                ray_trace: false,
                ray_trace_third_person: false,
            },
        );
        assert!(!settings.policy_for("nether").ray_trace);
        assert!(settings.policy_for("overworld").ray_trace);
    }

    #[test]
    fn policy_json_fills_missing_fields() {
        let p: WorldPolicy = serde_json::from_str(r#"{"rayTraceThirdPerson":true}"#).unwrap();
        assert!(p.ray_trace);
        assert!(p.ray_trace_third_person);
    }
}
