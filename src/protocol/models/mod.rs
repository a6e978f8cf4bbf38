pub mod audio;
pub mod common;
pub mod content;
pub mod session;
pub mod tools;

pub use audio::{AudioFormat, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use common::{ArbitraryJson, DEFAULT_MODEL, JsonSchema, Modality, Role};
pub use content::{Blob, Content, Part, Transcription};
pub use session::{
    AudioTranscriptionConfig, GenerationConfig, PrebuiltVoiceConfig, SetupConfig, SpeechConfig,
    VoiceConfig,
};
pub use tools::{FunctionCall, FunctionDeclaration, FunctionResponse, ToolDeclaration};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_uses_upper_case_wire_names() {
        let serialized = serde_json::to_string(&Modality::Audio).unwrap();
        assert_eq!(serialized, "\"AUDIO\"");
        let deserialized: Modality = serde_json::from_str("\"TEXT\"").unwrap();
        assert_eq!(deserialized, Modality::Text);
    }
}
