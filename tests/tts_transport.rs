//! HTTP speech synthesis against a wiremock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde_json::json;
use voxchat::ChatError;
use voxchat::config::TtsConfig;
use voxchat::tts::{HttpSynthesizer, SpeechSynthesizer};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn synthesizer(server: &MockServer) -> HttpSynthesizer {
    HttpSynthesizer::new(&TtsConfig {
        url: format!("{}/api/tts", server.uri()),
        ..TtsConfig::default()
    })
}

#[tokio::test]
async fn returns_audio_bytes() {
    let server = MockServer::start().await;
    let audio = vec![0xFFu8, 0xFB, 0x90, 0x00, 0x01, 0x02];
    Mock::given(method("POST"))
        .and(path("/api/tts"))
        .and(body_json(json!({"text": "Cats sleep 16 hours a day."})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(audio.clone(), "audio/mpeg"))
        .expect(1)
        .mount(&server)
        .await;

    let clip = synthesizer(&server)
        .synthesize("Cats sleep 16 hours a day.")
        .await
        .unwrap();
    assert_eq!(clip.data.as_ref(), audio.as_slice());
    assert_eq!(clip.content_type.as_deref(), Some("audio/mpeg"));
    assert_eq!(clip.extension_hint(), Some("mp3"));
}

#[tokio::test]
async fn non_success_is_a_synthesis_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": "Failed to generate speech"})),
        )
        .mount(&server)
        .await;

    let err = synthesizer(&server).synthesize("hello").await.unwrap_err();
    match err {
        ChatError::Synthesis(message) => {
            assert!(message.contains("500"), "{message}");
            assert!(message.contains("Failed to generate speech"), "{message}");
        }
        other => panic!("expected synthesis error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_payload_is_a_synthesis_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(Vec::<u8>::new(), "audio/mpeg"))
        .mount(&server)
        .await;

    let err = synthesizer(&server).synthesize("hello").await.unwrap_err();
    assert!(matches!(err, ChatError::Synthesis(m) if m.contains("empty")));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_synthesis_error() {
    let synthesizer = HttpSynthesizer::new(&TtsConfig {
        url: "http://127.0.0.1:9/api/tts".into(),
        ..TtsConfig::default()
    });
    let err = synthesizer.synthesize("hello").await.unwrap_err();
    assert!(matches!(err, ChatError::Synthesis(_)));
}
