//! Write-side commands

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{
    rule_aggregate, scene_aggregate, source_aggregate, OBS_SYSTEM_AGGREGATE, RECORDING_AGGREGATE,
    STREAM_AGGREGATE,
};

/// An intent to change OBS state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SwitchScene {
        to_scene: String,
        #[serde(default)]
        transition_type: Option<String>,
        #[serde(default)]
        transition_duration: Option<u32>,
    },
    CreateScene {
        scene_name: String,
        #[serde(default)]
        scene_settings: Map<String, Value>,
    },
    StartStream {
        #[serde(default)]
        stream_settings: Map<String, Value>,
        #[serde(default)]
        service: Option<String>,
    },
    StopStream,
    StartRecording {
        #[serde(default)]
        output_path: Option<String>,
    },
    StopRecording,
    SetSourceVolume {
        source_name: String,
        volume: f64,
        #[serde(default)]
        volume_db: Option<f64>,
    },
    SetInputMute {
        input_name: String,
        muted: bool,
    },
    TriggerAutomationRule {
        rule_id: String,
        rule_name: String,
        trigger_type: String,
        #[serde(default)]
        trigger_data: Map<String, Value>,
    },
}

impl Command {
    pub fn switch_scene(to_scene: impl Into<String>) -> Self {
        Command::SwitchScene {
            to_scene: to_scene.into(),
            transition_type: None,
            transition_duration: None,
        }
    }

    pub fn create_scene(scene_name: impl Into<String>) -> Self {
        Command::CreateScene {
            scene_name: scene_name.into(),
            scene_settings: Map::new(),
        }
    }

    pub fn start_stream() -> Self {
        Command::StartStream {
            stream_settings: Map::new(),
            service: None,
        }
    }

    pub fn set_volume(source_name: impl Into<String>, volume: f64) -> Self {
        Command::SetSourceVolume {
            source_name: source_name.into(),
            volume,
            volume_db: None,
        }
    }

    /// The aggregate whose history validates this command
    pub fn aggregate_id(&self) -> String {
        match self {
            Command::SwitchScene { .. } => OBS_SYSTEM_AGGREGATE.to_string(),
            Command::CreateScene { scene_name, .. } => scene_aggregate(scene_name),
            Command::StartStream { .. } | Command::StopStream => STREAM_AGGREGATE.to_string(),
            Command::StartRecording { .. } | Command::StopRecording => {
                RECORDING_AGGREGATE.to_string()
            }
            Command::SetSourceVolume { source_name, .. } => source_aggregate(source_name),
            Command::SetInputMute { input_name, .. } => source_aggregate(input_name),
            Command::TriggerAutomationRule { rule_id, .. } => rule_aggregate(rule_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::SwitchScene { .. } => "switch_scene",
            Command::CreateScene { .. } => "create_scene",
            Command::StartStream { .. } => "start_stream",
            Command::StopStream => "stop_stream",
            Command::StartRecording { .. } => "start_recording",
            Command::StopRecording => "stop_recording",
            Command::SetSourceVolume { .. } => "set_source_volume",
            Command::SetInputMute { .. } => "set_input_mute",
            Command::TriggerAutomationRule { .. } => "trigger_automation_rule",
        }
    }
}

/// A command plus the metadata stamped onto the events it produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: Uuid,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(command: Command) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            issued_at: Utc::now(),
            correlation_id: None,
            user_id: None,
            command,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn aggregate_id(&self) -> String {
        self.command.aggregate_id()
    }
}

impl From<Command> for CommandEnvelope {
    fn from(command: Command) -> Self {
        Self::new(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregate_ids() {
        assert_eq!(Command::switch_scene("Main").aggregate_id(), "obs_system");
        assert_eq!(Command::create_scene("Main").aggregate_id(), "scene:Main");
        assert_eq!(Command::StopStream.aggregate_id(), "stream");
        assert_eq!(Command::StopRecording.aggregate_id(), "recording");
        assert_eq!(Command::set_volume("Mic", 0.5).aggregate_id(), "source:Mic");
    }

    #[test]
    fn test_command_json_shape() {
        let value = serde_json::to_value(Command::switch_scene("Main")).unwrap();
        assert_eq!(value["command"], json!("switch_scene"));
        assert_eq!(value["to_scene"], json!("Main"));

        let parsed: Command =
            serde_json::from_value(json!({"command": "set_input_mute", "input_name": "Mic", "muted": true}))
                .unwrap();
        assert_eq!(
            parsed,
            Command::SetInputMute {
                input_name: "Mic".to_string(),
                muted: true
            }
        );
    }
}
