//! Data types for the event sourcing engine
//!
//! - `event`: domain events stored in the log
//! - `obs`: inbound events as OBS emits them

mod event;
mod obs;

pub use event::{
    rule_aggregate, scene_aggregate, source_aggregate, AutomationRuleCreatedData,
    AutomationRuleExecutedData, AutomationRuleFailedData, AutomationRuleTriggeredData, Event,
    EventMetadata, EventParseError, EventPayload, EventRecord, EventType, InputMuteChangedData,
    RecordingStartedData, RecordingStoppedData, SceneCreatedData, SceneDeletedData,
    SceneSwitchedData, SourceCreatedData, SourceVolumeChangedData, StreamStartedData,
    StreamStoppedData, SystemErrorData, SystemPerformanceWarningData, OBS_SYSTEM_AGGREGATE,
    RECORDING_AGGREGATE, STREAM_AGGREGATE,
};
pub use obs::{
    InputAdded, InputGone, InputMute, InputVolume, ObsEvent, ObsEventCategory, ObsEventData,
    ObsEventPriority, OutputState, ProgramSceneChanged, RawObsEvent, SceneLifecycle,
    SceneRenamed, StudioMode, OUTPUT_STARTED, OUTPUT_STOPPED,
};
