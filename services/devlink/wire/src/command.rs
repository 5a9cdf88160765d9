//! Outbound command encoding.
//!
//! Commands are fire-and-forget. The protocol has no correlation id, so the
//! effect of a command is only visible in a later telemetry packet.

use crate::error::WireError;
use crate::telemetry::Phase;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Bare command tokens, sent as raw text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// Session handshake sent right after the socket opens
    Connect,
    /// Ask the device for an immediate telemetry packet
    GetTelemetry,
    /// Start the uploaded cycle
    StartCycle,
    /// Stop the running cycle
    StopCycle,
    /// Advance to the next phase
    SkipPhase,
}

impl Token {
    /// Wire text of the token
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Connect => "connect",
            Token::GetTelemetry => "get_telemetry",
            Token::StartCycle => "start_cycle",
            Token::StopCycle => "stop_cycle",
            Token::SkipPhase => "skip_phase",
        }
    }

    /// Look up a token by its wire text
    pub fn from_wire(text: &str) -> Option<Self> {
        match text {
            "connect" => Some(Token::Connect),
            "get_telemetry" => Some(Token::GetTelemetry),
            "start_cycle" => Some(Token::StartCycle),
            "stop_cycle" => Some(Token::StopCycle),
            "skip_phase" => Some(Token::SkipPhase),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cycle definition pushed with `write_json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleUpload {
    /// Ordered phases of the cycle
    pub phases: Vec<Phase>,
}

/// Structured commands the device understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Keep-alive probe
    Ping,
    /// Drive a GPIO pin to a raw level
    ToggleGpio {
        /// Pin number
        pin: u32,
        /// Raw level to write (inverted sense: 0 = on)
        state: u8,
    },
    /// Upload a cycle definition
    WriteJson {
        /// Cycle payload
        data: CycleUpload,
    },
    /// Jump to a phase of the running cycle
    SkipToPhase {
        /// Target phase index
        index: u32,
    },
}

/// Anything that can be sent to the device
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    /// Bare token
    Token(Token),
    /// Known structured command
    Action(Action),
    /// Structured command not modelled by [`Action`]
    Custom {
        /// Value of the `action` key
        action: String,
        /// Remaining fields of the object
        params: Map<String, Value>,
    },
}

impl OutboundCommand {
    /// Build a custom `{action, ...params}` command
    pub fn custom(action: impl Into<String>, params: Map<String, Value>) -> Result<Self, WireError> {
        let action = action.into();
        if action.trim().is_empty() {
            return Err(WireError::EmptyAction);
        }
        Ok(OutboundCommand::Custom { action, params })
    }

    /// Interpret operator or collaborator input.
    ///
    /// Known bare tokens map to [`Token`]; JSON objects with an `action` key
    /// map to [`Action`] when they match a known shape and to
    /// [`OutboundCommand::Custom`] otherwise.
    pub fn parse(input: &str) -> Result<Self, WireError> {
        let input = input.trim();
        if let Some(token) = Token::from_wire(input) {
            return Ok(OutboundCommand::Token(token));
        }

        let value: Value = serde_json::from_str(input).map_err(WireError::Malformed)?;
        if let Ok(action) = serde_json::from_value::<Action>(value.clone()) {
            return Ok(OutboundCommand::Action(action));
        }

        match value {
            Value::Object(mut map) => match map.remove("action") {
                Some(Value::String(action)) => Self::custom(action, map),
                _ => Err(WireError::EmptyAction),
            },
            _ => Err(WireError::EmptyAction),
        }
    }

    /// Encode the command as the text frame the device expects
    pub fn encode(&self) -> Result<String, WireError> {
        match self {
            OutboundCommand::Token(token) => Ok(token.as_str().to_string()),
            OutboundCommand::Action(action) => {
                serde_json::to_string(action).map_err(WireError::Encode)
            }
            OutboundCommand::Custom { action, params } => {
                let mut object = Map::with_capacity(params.len() + 1);
                object.insert("action".to_string(), Value::String(action.clone()));
                for (key, value) in params {
                    if key != "action" {
                        object.insert(key.clone(), value.clone());
                    }
                }
                serde_json::to_string(&Value::Object(object)).map_err(WireError::Encode)
            }
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &str {
        match self {
            OutboundCommand::Token(token) => token.as_str(),
            OutboundCommand::Action(Action::Ping) => "ping",
            OutboundCommand::Action(Action::ToggleGpio { .. }) => "toggle_gpio",
            OutboundCommand::Action(Action::WriteJson { .. }) => "write_json",
            OutboundCommand::Action(Action::SkipToPhase { .. }) => "skip_to_phase",
            OutboundCommand::Custom { action, .. } => action,
        }
    }

    /// Keep-alive probe
    pub fn ping() -> Self {
        OutboundCommand::Action(Action::Ping)
    }

    /// Write a raw level to a pin
    pub fn toggle_gpio(pin: u32, state: u8) -> Self {
        OutboundCommand::Action(Action::ToggleGpio { pin, state })
    }

    /// Jump to a phase of the running cycle
    pub fn skip_to_phase(index: u32) -> Self {
        OutboundCommand::Action(Action::SkipToPhase { index })
    }

    /// Upload a cycle definition
    pub fn write_json(phases: Vec<Phase>) -> Self {
        OutboundCommand::Action(Action::WriteJson {
            data: CycleUpload { phases },
        })
    }
}

impl From<Token> for OutboundCommand {
    fn from(token: Token) -> Self {
        OutboundCommand::Token(token)
    }
}

impl From<Action> for OutboundCommand {
    fn from(action: Action) -> Self {
        OutboundCommand::Action(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Component;

    #[test]
    fn test_tokens_encode_as_raw_text() {
        assert_eq!(OutboundCommand::from(Token::Connect).encode().unwrap(), "connect");
        assert_eq!(OutboundCommand::from(Token::GetTelemetry).encode().unwrap(), "get_telemetry");
        assert_eq!(OutboundCommand::from(Token::SkipPhase).encode().unwrap(), "skip_phase");
    }

    #[test]
    fn test_ping_and_toggle_shapes() {
        assert_eq!(OutboundCommand::ping().encode().unwrap(), r#"{"action":"ping"}"#);

        let toggle = OutboundCommand::toggle_gpio(4, 0).encode().unwrap();
        let value: Value = serde_json::from_str(&toggle).unwrap();
        assert_eq!(value["action"], "toggle_gpio");
        assert_eq!(value["pin"], 4);
        assert_eq!(value["state"], 0);
    }

    #[test]
    fn test_skip_to_phase_index_stays_integer() {
        // Echo the encoded command the way a device would see it
        let text = OutboundCommand::skip_to_phase(2).encode().unwrap();
        let echoed: Value = serde_json::from_str(&text).unwrap();
        assert!(echoed["index"].is_u64());
        assert_eq!(echoed["index"].as_u64(), Some(2));

        match OutboundCommand::parse(&text).unwrap() {
            OutboundCommand::Action(Action::SkipToPhase { index }) => assert_eq!(index, 2),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_write_json_payload() {
        let phase = Phase {
            id: "p1".into(),
            name: "Wash".into(),
            color: "#4caf50".into(),
            start_time: 0,
            components: vec![Component {
                id: "c1".into(),
                label: "Drum".into(),
                comp_id: "motor".into(),
                start: 0,
                duration: 30_000,
                has_motor: true,
            }],
        };

        let text = OutboundCommand::write_json(vec![phase]).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["action"], "write_json");
        assert_eq!(value["data"]["phases"][0]["name"], "Wash");
        assert_eq!(value["data"]["phases"][0]["components"][0]["hasMotor"], true);
        assert_eq!(value["data"]["phases"][0]["components"][0]["duration"], 30_000);
    }

    #[test]
    fn test_custom_command_owns_action_key() {
        let mut params = Map::new();
        params.insert("level".into(), Value::from(3));
        params.insert("action".into(), Value::from("ignored"));

        let text = OutboundCommand::custom("set_led", params).unwrap().encode().unwrap();
        assert_eq!(text, r#"{"action":"set_led","level":3}"#);
    }

    #[test]
    fn test_parse_operator_input() {
        assert_eq!(
            OutboundCommand::parse(" start_cycle ").unwrap(),
            OutboundCommand::Token(Token::StartCycle)
        );
        assert_eq!(
            OutboundCommand::parse(r#"{"action":"toggle_gpio","pin":12,"state":1}"#).unwrap(),
            OutboundCommand::toggle_gpio(12, 1)
        );
        assert!(matches!(
            OutboundCommand::parse(r#"{"action":"reboot","delay":5}"#).unwrap(),
            OutboundCommand::Custom { ref action, .. } if action == "reboot"
        ));
        assert!(OutboundCommand::parse("not a command").is_err());
        assert!(matches!(
            OutboundCommand::parse(r#"{"pin":3}"#),
            Err(WireError::EmptyAction)
        ));
        assert!(OutboundCommand::custom("  ", Map::new()).is_err());
    }
}
