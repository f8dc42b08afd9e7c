use chrono::Utc;

use super::*;
use crate::content::ContentType;

fn message_with(metadata: Option<&str>) -> Message {
    Message {
        id: 7,
        session_id: "abc".to_string(),
        role: Role::Assistant,
        content: "Temos vidro temperado.".to_string(),
        timestamp: Utc::now().naive_utc(),
        metadata: metadata.map(str::to_string),
    }
}

#[test]
fn message_metadata_parsing() {
    let metadata = MessageMetadata {
        sources: vec![StoredSource {
            score: 0.75,
            metadata: ContentMetadata::new("website", ContentType::Website)
                .with_url("https://emvidros.com.br/produtos"),
        }],
    };
    let raw = serde_json::to_string(&metadata).expect("metadata should serialize");

    let parsed = message_with(Some(&raw))
        .parsed_metadata()
        .expect("metadata should parse");
    assert_eq!(parsed, metadata);
}

#[test]
fn missing_or_broken_message_metadata() {
    assert!(message_with(None).parsed_metadata().is_none());
    assert!(message_with(Some("{not json")).parsed_metadata().is_none());
}

#[test]
fn metadata_without_sources_defaults_to_empty() {
    let parsed = message_with(Some("{}"))
        .parsed_metadata()
        .expect("empty object should parse");
    assert!(parsed.sources.is_empty());
}

#[test]
fn session_metadata_map() {
    let now = Utc::now().naive_utc();
    let session = Session {
        session_id: "abc".to_string(),
        created_at: now,
        updated_at: now,
        metadata: Some(r#"{"channel":"whatsapp"}"#.to_string()),
    };
    assert_eq!(
        session.metadata_map().get("channel").map(String::as_str),
        Some("whatsapp")
    );

    let broken = Session {
        metadata: Some("[1, 2".to_string()),
        ..session
    };
    assert!(broken.metadata_map().is_empty());
}
