use live_rt_rs::protocol::client_events::{ClientContent, RealtimeInput, ToolResponse};
use live_rt_rs::{
    AgentMode, Blob, ClientMessage, Content, Error, FunctionDeclaration, FunctionResponse,
    LiveConfig, SetupConfig, ToolDeclaration, validate_client_message,
};
use serde_json::json;

fn audio_chunk(mime_type: &str, data: &str) -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![Blob {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        }],
    })
}

fn assert_invalid(message: &ClientMessage) {
    match validate_client_message(message) {
        Err(Error::InvalidClientMessage(_)) => {}
        other => panic!("expected InvalidClientMessage, got {other:?}"),
    }
}

#[test]
fn default_setup_is_valid() {
    let setup = LiveConfig::default().setup(AgentMode::GameMaster).unwrap();
    validate_client_message(&ClientMessage::Setup(Box::new(setup))).unwrap();
}

#[test]
fn setup_without_model_is_rejected() {
    assert_invalid(&ClientMessage::Setup(Box::new(SetupConfig::new("  "))));
}

#[test]
fn unnamed_declaration_is_rejected() {
    let mut setup = SetupConfig::new("models/test");
    setup.tools = vec![ToolDeclaration {
        function_declarations: vec![FunctionDeclaration {
            name: String::new(),
            description: None,
            parameters: json!({ "type": "object" }),
        }],
    }];
    assert_invalid(&ClientMessage::Setup(Box::new(setup)));
}

#[test]
fn audio_chunk_checks() {
    validate_client_message(&audio_chunk("audio/pcm;rate=16000", "AAAA")).unwrap();
    assert_invalid(&audio_chunk("audio/opus", "AAAA"));
    assert_invalid(&audio_chunk("audio/pcm;rate=16000", "AAA"));
    assert_invalid(&audio_chunk("audio/pcm;rate=16000", "AA=A"));
    assert_invalid(&audio_chunk("audio/pcm;rate=16000", "A*AA"));
    assert_invalid(&ClientMessage::RealtimeInput(RealtimeInput::default()));
}

#[test]
fn oversized_audio_chunk_is_rejected() {
    let data = "A".repeat(21 * 1024 * 1024);
    assert_invalid(&audio_chunk("audio/pcm;rate=16000", &data));
}

#[test]
fn client_content_needs_text() {
    validate_client_message(&ClientMessage::user_text("hi")).unwrap();
    assert_invalid(&ClientMessage::user_text("   "));
    assert_invalid(&ClientMessage::ClientContent(ClientContent {
        turns: vec![Content::default()],
        turn_complete: true,
    }));
}

#[test]
fn tool_response_needs_ids() {
    validate_client_message(&ClientMessage::tool_response("a", "rollCheck", json!({}))).unwrap();
    assert_invalid(&ClientMessage::ToolResponse(ToolResponse::default()));
    assert_invalid(&ClientMessage::ToolResponse(ToolResponse {
        function_responses: vec![FunctionResponse {
            id: String::new(),
            name: "rollCheck".into(),
            response: json!({}),
        }],
    }));
}
