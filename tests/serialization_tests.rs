use live_rt_rs::audio::pcm;
use live_rt_rs::protocol::server_events::parse_server_frame;
use live_rt_rs::{AgentMode, ClientMessage, LiveConfig, Modality, ServerEvent};
use serde_json::json;

#[test]
fn setup_message_shape() {
    let setup = LiveConfig::default().setup(AgentMode::Director).unwrap();
    let value = serde_json::to_value(ClientMessage::Setup(Box::new(setup))).unwrap();
    let setup = &value["setup"];

    assert!(setup["model"].as_str().unwrap().starts_with("models/"));
    assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
    assert!(setup["inputAudioTranscription"].is_object());
    assert!(setup["outputAudioTranscription"].is_object());

    let instruction = setup["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
    assert!(instruction.contains("[MODE DIRECTOR]"));

    let names: Vec<&str> = setup["tools"][0]["functionDeclarations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["suggestEdit", "rollCheck"]);
}

#[test]
fn text_modality_is_announced() {
    let config = LiveConfig {
        response_modality: Modality::Text,
        ..LiveConfig::default()
    };
    let value = serde_json::to_value(config.setup(AgentMode::Editor).unwrap()).unwrap();
    assert_eq!(value["generationConfig"]["responseModalities"], json!(["TEXT"]));
}

#[test]
fn realtime_input_carries_mime_and_base64() {
    let frame = live_rt_rs::AudioFrame::from_float(&[0.0, 0.5, -0.5], 16_000);
    let value = serde_json::to_value(frame.into_message()).unwrap();
    let chunk = &value["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    let decoded = pcm::decode_base64(chunk["data"].as_str().unwrap()).unwrap();
    assert_eq!(decoded.len(), 3);
}

#[test]
fn context_note_does_not_complete_the_turn() {
    let value = serde_json::to_value(ClientMessage::context_note("[DOCUMENT]\nhi")).unwrap();
    assert_eq!(value["clientContent"]["turnComplete"], false);
    assert_eq!(value["clientContent"]["turns"][0]["role"], "user");

    let value = serde_json::to_value(ClientMessage::user_text("hello")).unwrap();
    assert_eq!(value["clientContent"]["turnComplete"], true);
}

#[test]
fn tool_response_shape() {
    let message = ClientMessage::tool_response("call-1", "rollCheck", json!({ "result": 7 }));
    let value = serde_json::to_value(message).unwrap();
    assert_eq!(
        value,
        json!({
            "toolResponse": {
                "functionResponses": [
                    { "id": "call-1", "name": "rollCheck", "response": { "result": 7 } }
                ]
            }
        })
    );
}

#[test]
fn model_turn_with_audio_and_transcription() {
    let frame = json!({
        "serverContent": {
            "modelTurn": {
                "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAA=" } }
                ]
            },
            "outputTranscription": { "text": "Hello" }
        }
    })
    .to_string();
    let events = parse_server_frame(&frame).unwrap();
    assert_eq!(
        events,
        vec![
            ServerEvent::OutputTranscription {
                text: "Hello".into()
            },
            ServerEvent::AudioChunk {
                mime_type: "audio/pcm;rate=24000".into(),
                data: "AAA=".into()
            },
        ]
    );
}

#[test]
fn tool_call_and_cancellation_frames() {
    let frame = json!({
        "toolCall": {
            "functionCalls": [
                { "id": "a", "name": "rollCheck", "args": { "sides": 6 } }
            ]
        }
    })
    .to_string();
    match parse_server_frame(&frame).unwrap().as_slice() {
        [ServerEvent::ToolCall { calls }] => {
            assert_eq!(calls[0].id, "a");
            assert_eq!(calls[0].args["sides"], 6);
        }
        other => panic!("unexpected events: {other:?}"),
    }

    let frame = json!({ "toolCallCancellation": { "ids": ["a", "b"] } }).to_string();
    assert_eq!(
        parse_server_frame(&frame).unwrap(),
        vec![ServerEvent::ToolCallCancellation {
            ids: vec!["a".into(), "b".into()]
        }]
    );
}

#[test]
fn setup_complete_interrupted_and_go_away() {
    assert_eq!(
        parse_server_frame(r#"{"setupComplete":{}}"#).unwrap(),
        vec![ServerEvent::SetupComplete]
    );
    assert_eq!(
        parse_server_frame(r#"{"serverContent":{"interrupted":true}}"#).unwrap(),
        vec![ServerEvent::Interrupted]
    );
    assert_eq!(
        parse_server_frame(r#"{"goAway":{"timeLeft":"5s"}}"#).unwrap(),
        vec![ServerEvent::GoAway {
            time_left: Some("5s".into())
        }]
    );
}

#[test]
fn server_error_frame() {
    let frame = r#"{"error":{"code":429,"message":"quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
    match parse_server_frame(frame).unwrap().as_slice() {
        [ServerEvent::Error { error }] => {
            assert_eq!(error.code, Some(429));
            assert_eq!(error.message, "quota exceeded");
        }
        other => panic!("unexpected events: {other:?}"),
    }
}
