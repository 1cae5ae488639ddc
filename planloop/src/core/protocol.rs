//! Decoding of the agent's newline-delimited JSON event stream.
//!
//! The agent writes one JSON object per line to stdout. Decoding never
//! fails: a line that is not valid protocol JSON is surfaced as incidental
//! raw output, not as a run failure.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One decoded line from the agent's primary output channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Stream preamble carrying the session identifier.
    Init { session_id: String },
    /// Incremental assistant text.
    Text { text: String },
    /// Terminal result. The most recent one observed before exit wins.
    Result(ResultEvent),
    /// A line that was not a recognized protocol event.
    Raw { line: String },
}

/// Payload of a terminal `result` event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultEvent {
    pub is_error: bool,
    pub subtype: String,
    pub text: String,
    pub session_id: String,
    pub usage: Option<TokenUsage>,
}

impl ResultEvent {
    /// Message to surface when the agent flags its own failure.
    pub fn error_message(&self) -> String {
        if self.text.is_empty() {
            self.subtype.clone()
        } else {
            self.text.clone()
        }
    }
}

/// Token counters reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    System {
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: WireMessage,
    },
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: WireContent,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

impl Default for WireContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl WireMessage {
    fn text(&self) -> String {
        match &self.content {
            WireContent::Text(text) => text.clone(),
            WireContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    WireBlock::Text { text } => Some(text.as_str()),
                    WireBlock::Other => None,
                })
                .collect(),
        }
    }
}

/// Decode one complete output line into an event. Never fails.
pub fn decode_line(line: &str) -> AgentEvent {
    match serde_json::from_str::<WireEvent>(line) {
        Ok(WireEvent::System { session_id }) => AgentEvent::Init {
            session_id: session_id.unwrap_or_default(),
        },
        Ok(WireEvent::Assistant { message }) => AgentEvent::Text {
            text: message.text(),
        },
        Ok(WireEvent::Result {
            subtype,
            is_error,
            result,
            session_id,
            usage,
        }) => {
            let subtype = subtype.unwrap_or_default();
            // Some agents only flag failure through the subtype.
            let is_error = is_error || subtype.starts_with("error");
            AgentEvent::Result(ResultEvent {
                is_error,
                subtype,
                text: result.unwrap_or_default(),
                session_id: session_id.unwrap_or_default(),
                usage,
            })
        }
        Ok(WireEvent::Other) | Err(_) => AgentEvent::Raw {
            line: line.to_string(),
        },
    }
}

/// Strip terminal control sequences (CSI color/cursor codes and other
/// escape pairs) from diagnostic output before surfacing it in errors.
pub fn strip_control_sequences(input: &str) -> String {
    let pattern = Regex::new(r"\x1b\[[0-9;?]*[@-~]|\x1b[()#][0-9A-Za-z]|\x1b.")
        .expect("control sequence pattern is valid");
    pattern.replace_all(input, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_system_init_with_session_id() {
        let event = decode_line(r#"{"type":"system","subtype":"init","session_id":"abc-123"}"#);
        assert_eq!(
            event,
            AgentEvent::Init {
                session_id: "abc-123".to_string()
            }
        );
    }

    #[test]
    fn decodes_assistant_text_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello "},{"type":"tool_use","id":"t1","name":"bash","input":{}},{"type":"text","text":"world"}]}}"#;
        assert_eq!(
            decode_line(line),
            AgentEvent::Text {
                text: "hello world".to_string()
            }
        );
    }

    #[test]
    fn decodes_assistant_plain_string_content() {
        let line = r#"{"type":"assistant","message":{"content":"plain"}}"#;
        assert_eq!(
            decode_line(line),
            AgentEvent::Text {
                text: "plain".to_string()
            }
        );
    }

    #[test]
    fn decodes_successful_result_with_usage() {
        let line = r#"{"type":"result","subtype":"success","is_error":false,"result":"all good","session_id":"s1","usage":{"input_tokens":10,"output_tokens":20}}"#;
        let AgentEvent::Result(result) = decode_line(line) else {
            panic!("expected a result event");
        };
        assert!(!result.is_error);
        assert_eq!(result.text, "all good");
        assert_eq!(result.session_id, "s1");
        assert_eq!(
            result.usage,
            Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 20
            })
        );
    }

    #[test]
    fn error_subtype_marks_result_as_error() {
        let line = r#"{"type":"result","subtype":"error_during_execution","result":"it broke"}"#;
        let AgentEvent::Result(result) = decode_line(line) else {
            panic!("expected a result event");
        };
        assert!(result.is_error);
        assert_eq!(result.error_message(), "it broke");
    }

    #[test]
    fn error_message_falls_back_to_subtype() {
        let result = ResultEvent {
            is_error: true,
            subtype: "error_max_turns".to_string(),
            ..ResultEvent::default()
        };
        assert_eq!(result.error_message(), "error_max_turns");
    }

    #[test]
    fn invalid_json_becomes_raw_output() {
        let event = decode_line("plain progress text, not json");
        assert_eq!(
            event,
            AgentEvent::Raw {
                line: "plain progress text, not json".to_string()
            }
        );
    }

    #[test]
    fn unknown_event_type_becomes_raw_output() {
        let line = r#"{"type":"user","message":{"content":"tool result echo"}}"#;
        assert_eq!(
            decode_line(line),
            AgentEvent::Raw {
                line: line.to_string()
            }
        );
    }

    #[test]
    fn strips_ansi_color_and_cursor_codes() {
        let noisy = "\x1b[1;31merror:\x1b[0m something \x1b[2Kbad\x1b(B happened";
        assert_eq!(
            strip_control_sequences(noisy),
            "error: something bad happened"
        );
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(strip_control_sequences("just text"), "just text");
    }
}
