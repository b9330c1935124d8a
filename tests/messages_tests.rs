// Tests for the live API wire format

use base64::Engine;
use natiq_live::audio::{AudioFrame, RENDER_SAMPLE_RATE};
use natiq_live::error::PipelineError;
use natiq_live::remote::{ClientMessage, RemoteEvent, ServerMessage};
use natiq_live::session::{PersonaConfig, VoiceName};
use serde_json::{json, Value};

fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn events(value: Value) -> natiq_live::error::Result<Vec<RemoteEvent>> {
    ServerMessage::parse(value.to_string().as_bytes())?.into_events()
}

#[test]
fn test_setup_carries_voice_and_instruction() {
    let persona = PersonaConfig {
        voice: VoiceName::Kore,
        system_instruction: "Speak in the Najdi dialect.".to_string(),
        ..PersonaConfig::default()
    };

    let value = serde_json::to_value(ClientMessage::setup("models/test", &persona)).unwrap();
    let setup = &value["setup"];

    assert_eq!(setup["model"], "models/test");
    assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
    assert_eq!(
        setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Kore"
    );
    assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Speak in the Najdi dialect.");
}

#[test]
fn test_setup_omits_blank_instruction() {
    let value = serde_json::to_value(ClientMessage::setup("models/test", &PersonaConfig::default())).unwrap();

    assert!(value["setup"].get("systemInstruction").is_none());
    assert_eq!(
        value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Fenrir"
    );
}

#[test]
fn test_audio_frame_as_realtime_input() {
    let frame = AudioFrame::from_pcm(vec![1, -2, 300], 7);

    let value = serde_json::to_value(ClientMessage::audio(&frame)).unwrap();
    let chunk = &value["realtimeInput"]["mediaChunks"][0];

    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(chunk["data"], encode(&[0x01, 0x00, 0xFE, 0xFF, 0x2C, 0x01]));
}

#[test]
fn test_setup_complete() {
    let message = ServerMessage::parse(br#"{"setupComplete": {}}"#).unwrap();

    assert!(message.is_setup_complete());
    assert!(message.into_events().unwrap().is_empty());
}

#[test]
fn test_model_audio_then_turn_complete() {
    let data = encode(&[0x00, 0x40, 0x00, 0xC0]);
    let events = events(json!({
        "serverContent": {
            "modelTurn": {
                "parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": data}},
                    {"text": "ignored"}
                ]
            },
            "turnComplete": true
        }
    }))
    .unwrap();

    assert_eq!(events.len(), 2);
    match &events[0] {
        RemoteEvent::Audio(payload) => {
            assert_eq!(payload.data, data);
            assert_eq!(payload.sample_rate, RENDER_SAMPLE_RATE);
            assert_eq!(payload.sample_width, 2);
        }
        other => panic!("Expected audio, got {:?}", other),
    }
    assert!(matches!(events[1], RemoteEvent::TurnComplete));
}

#[test]
fn test_audio_rate_comes_from_mime_type() {
    let events = events(json!({
        "serverContent": {
            "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=16000", "data": ""}}]}
        }
    }))
    .unwrap();

    // The scheduler rejects the rate later; the parser only reports it
    match &events[0] {
        RemoteEvent::Audio(payload) => assert_eq!(payload.sample_rate, 16000),
        other => panic!("Expected audio, got {:?}", other),
    }
}

#[test]
fn test_interrupted() {
    let events = events(json!({"serverContent": {"interrupted": true}})).unwrap();

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], RemoteEvent::Interrupted));
}

#[test]
fn test_non_audio_inline_data_is_skipped() {
    let data = encode(&[0x00, 0x40]);
    let events = events(json!({
        "serverContent": {
            "modelTurn": {
                "parts": [
                    {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": data}}
                ]
            },
            "interrupted": true,
            "turnComplete": true
        }
    }))
    .unwrap();

    // The image is dropped; audio, the interruption and turn end survive
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], RemoteEvent::Audio(payload) if payload.data == data));
    assert!(matches!(events[1], RemoteEvent::Interrupted));
    assert!(matches!(events[2], RemoteEvent::TurnComplete));
}

#[test]
fn test_interruption_survives_unexpected_part() {
    let events = events(json!({
        "serverContent": {
            "interrupted": true,
            "modelTurn": {"parts": [{"inlineData": {"mimeType": "image/png", "data": ""}}]}
        }
    }))
    .unwrap();

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], RemoteEvent::Interrupted));
}

#[test]
fn test_unrecognised_message_is_protocol_error() {
    let result = events(json!({"somethingNew": {"value": 1}}));

    assert!(matches!(result, Err(PipelineError::Protocol(_))));
}

#[test]
fn test_bookkeeping_messages_carry_no_events() {
    assert!(events(json!({"usageMetadata": {"totalTokenCount": 12}})).unwrap().is_empty());
    assert!(events(json!({"goAway": {"timeLeft": "10s"}})).unwrap().is_empty());
}

#[test]
fn test_invalid_json_fails_to_parse() {
    assert!(ServerMessage::parse(b"not json").is_err());
}
