pub mod audio;
pub mod common;
pub mod items;
pub mod response;
pub mod session;
pub mod tools;
pub mod usage;

pub use audio::{AudioFormat, InputAudioTranscription, TurnDetection};
pub use common::{
    ArbitraryJson, DEFAULT_MODEL, Eagerness, Infinite, ItemStatus, JsonSchema, MaxTokens,
    Modality, Role, Temperature, TemperatureError,
};
pub use items::{ContentPart, Item};
pub use response::{Response, ResponseConfig, ResponseStatus, ResponseStatusDetails};
pub use session::{Session, SessionConfig};
pub use tools::{Tool, ToolChoice, ToolChoiceMode};
pub use usage::{InputTokenDetails, OutputTokenDetails, Usage};
