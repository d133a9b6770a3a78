//! Realtime wire messages
//!
//! Outbound frames are built as JSON values; inbound messages are decoded
//! into typed structs and then flattened into [`InboundEvent`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::audio::AudioChunk;
use crate::tools::ToolInvocation;

/// Response modality requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

/// A function the model may call, advertised at connect time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// Everything the transport needs to open a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Model identifier, e.g. `gemini-2.5-flash-native-audio-preview-09-2025`
    pub model: String,
    pub system_instruction: String,
    pub tools: Vec<FunctionDeclaration>,
    pub response_modality: Modality,
    /// Prebuilt voice name
    pub voice: String,
    /// Ask for a text transcription of the spoken output
    pub output_transcription: bool,
}

impl SessionConfig {
    /// Setup frame opening the session
    #[must_use]
    pub fn setup_message(&self) -> Value {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        let mut setup = json!({
            "model": model,
            "generationConfig": {
                "responseModalities": [self.response_modality],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.voice }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": self.system_instruction }]
            },
            "tools": [{ "functionDeclarations": self.tools }]
        });

        if self.output_transcription {
            setup["outputAudioTranscription"] = json!({});
        }

        json!({ "setup": setup })
    }
}

/// Acknowledgement of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionResponse {
    /// Identifier of the invocation being acknowledged
    pub id: String,
    pub name: String,
    pub result: String,
}

/// A frame sent from the client to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// One captured audio chunk
    Media(AudioChunk),
    /// Tool acknowledgement
    ToolResponse(FunctionResponse),
}

impl ClientFrame {
    /// JSON representation on the wire
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Media(chunk) => json!({
                "realtimeInput": {
                    "mediaChunks": [{
                        "mimeType": chunk.mime_type,
                        "data": chunk.data,
                    }]
                }
            }),
            Self::ToolResponse(response) => json!({
                "toolResponse": {
                    "functionResponses": [{
                        "id": response.id,
                        "name": response.name,
                        "response": { "result": response.result },
                    }]
                }
            }),
        }
    }
}

/// A message received from the model
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<ToolInvocation>,
}

/// One thing an inbound message asks the client to do
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Base64 PCM speech to schedule
    Audio(String),
    /// Latest transcription fragment of the spoken output
    Transcription(String),
    /// The model wants a tool run
    ToolCall(ToolInvocation),
    /// The user talked over the model
    Interrupted,
}

impl ServerMessage {
    /// Parse a raw frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a JSON server message
    pub fn parse(raw: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Flatten into events, each field checked independently
    ///
    /// Order: audio, transcription, tool calls, interruption.
    #[must_use]
    pub fn into_events(self) -> Vec<InboundEvent> {
        let ServerContent {
            model_turn,
            output_transcription,
            interrupted,
            turn_complete: _,
        } = self.server_content.unwrap_or_default();

        let mut events = Vec::new();

        if let Some(turn) = model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|inline| {
                        inline
                            .mime_type
                            .as_deref()
                            .is_none_or(|mime| mime.starts_with("audio/"))
                    })
                    .filter(|inline| !inline.data.is_empty())
                    .map(|inline| InboundEvent::Audio(inline.data)),
            );
        }

        if let Some(text) = output_transcription.and_then(|t| t.text) {
            events.push(InboundEvent::Transcription(text));
        }

        if let Some(call) = self.tool_call {
            events.extend(call.function_calls.into_iter().map(InboundEvent::ToolCall));
        }

        if interrupted == Some(true) {
            events.push(InboundEvent::Interrupted);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            model: "gemini-live".to_string(),
            system_instruction: "Be a creative director".to_string(),
            tools: vec![FunctionDeclaration {
                name: "generateImage".to_string(),
                description: "Create an image".to_string(),
                parameters: json!({"type": "OBJECT"}),
            }],
            response_modality: Modality::Audio,
            voice: "Zephyr".to_string(),
            output_transcription: true,
        }
    }

    #[test]
    fn setup_message_carries_session_settings() {
        let setup = config().setup_message();

        assert_eq!(setup["setup"]["model"], "models/gemini-live");
        assert_eq!(
            setup["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(
            setup["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be a creative director"
        );
        assert_eq!(
            setup["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "generateImage"
        );
        assert!(setup["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn setup_message_omits_transcription_when_disabled() {
        let mut config = config();
        config.output_transcription = false;
        config.model = "models/already-prefixed".to_string();

        let setup = config.setup_message();
        assert!(setup["setup"].get("outputAudioTranscription").is_none());
        assert_eq!(setup["setup"]["model"], "models/already-prefixed");
    }

    #[test]
    fn tool_response_frame_shape() {
        let frame = ClientFrame::ToolResponse(FunctionResponse {
            id: "call-1".to_string(),
            name: "editImage".to_string(),
            result: "completed".to_string(),
        });

        let json = frame.to_json();
        let response = &json["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], "call-1");
        assert_eq!(response["name"], "editImage");
        assert_eq!(response["response"]["result"], "completed");
    }

    #[test]
    fn media_frame_shape() {
        let frame = ClientFrame::Media(AudioChunk {
            data: "AAA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        });

        let json = frame.to_json();
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAA=");
    }

    #[test]
    fn message_with_everything_yields_every_event() {
        let raw = br#"{
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}}]},
                "outputTranscription": {"text": "Here is your skyline"},
                "interrupted": true
            },
            "toolCall": {"functionCalls": [{"id": "c1", "name": "generateImage", "args": {"prompt": "neon skyline"}}]}
        }"#;

        let events = ServerMessage::parse(raw).unwrap().into_events();

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], InboundEvent::Audio("AAAA".to_string()));
        assert_eq!(
            events[1],
            InboundEvent::Transcription("Here is your skyline".to_string())
        );
        assert!(matches!(&events[2], InboundEvent::ToolCall(call) if call.id == "c1"));
        assert_eq!(events[3], InboundEvent::Interrupted);
    }

    #[test]
    fn tool_call_only_message() {
        let raw = br#"{"toolCall": {"functionCalls": [
            {"id": "a", "name": "editImage", "args": {"prompt": "add rain"}},
            {"id": "b", "name": "posterLayout", "args": {"prompt": "poster", "textContent": "SALE"}}
        ]}}"#;

        let events = ServerMessage::parse(raw).unwrap().into_events();
        let ids: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                InboundEvent::ToolCall(call) => Some(call.id.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn setup_complete_and_turn_complete_yield_nothing() {
        let setup = ServerMessage::parse(br#"{"setupComplete": {}}"#).unwrap();
        assert!(setup.setup_complete.is_some());
        assert!(setup.into_events().is_empty());

        let turn = ServerMessage::parse(br#"{"serverContent": {"turnComplete": true}}"#).unwrap();
        assert!(turn.into_events().is_empty());
    }

    #[test]
    fn interrupted_false_is_ignored() {
        let raw = br#"{"serverContent": {"interrupted": false}}"#;
        assert!(ServerMessage::parse(raw).unwrap().into_events().is_empty());
    }

    #[test]
    fn text_parts_are_not_audio() {
        let raw = br#"{"serverContent": {"modelTurn": {"parts": [{"text": "thinking"}]}}}"#;
        assert!(ServerMessage::parse(raw).unwrap().into_events().is_empty());
    }
}
