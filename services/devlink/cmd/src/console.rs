//! Line-oriented operator console.
//!
//! Each input line is parsed into a [`ConsoleCommand`] before anything touches
//! the link, so a malformed line only ever produces an error message.

use anyhow::{Context, Result};
use devlink_session::{ConnectionState, DeviceLink, Endpoint};
use devlink_telemetry::{HistorySample, TelemetryProjection};
use devlink_wire::{CycleUpload, OutboundCommand, Phase, Token, WireError};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  status              link state
  telemetry           latest sensor and cycle readings
  pins                GPIO levels (1 = off, inverted wiring)
  toggle <pin>        flip a digital output
  start | stop | skip run control
  goto <index>        jump to a phase (1-based)
  poll                request a telemetry packet
  upload <file>       send a cycle definition (JSON)
  send <json|token>   send a raw command
  endpoint <url>      switch device address
  connect | disconnect | reconnect
  clear               clear the last error
  history             rpm and pressure history
  help | quit";

/// Errors from parsing a console line
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),

    #[error("`{command}` needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("`{command}`: invalid argument {value:?}")]
    InvalidArgument { command: &'static str, value: String },

    #[error("invalid command payload: {0}")]
    Payload(#[from] WireError),

    #[error(transparent)]
    Endpoint(#[from] devlink_session::LinkError),
}

/// One parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Status,
    Telemetry,
    Pins,
    Toggle(u32),
    Start,
    Stop,
    Skip,
    Goto(u32),
    Poll,
    Upload(PathBuf),
    Send(OutboundCommand),
    Endpoint(Endpoint),
    Connect,
    Disconnect,
    Reconnect,
    Clear,
    History,
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "" => return Err(ConsoleError::Empty),
            "status" => ConsoleCommand::Status,
            "telemetry" | "t" => ConsoleCommand::Telemetry,
            "pins" => ConsoleCommand::Pins,
            "toggle" => ConsoleCommand::Toggle(number("toggle", "a pin number", rest)?),
            "start" => ConsoleCommand::Start,
            "stop" => ConsoleCommand::Stop,
            "skip" => ConsoleCommand::Skip,
            "goto" => {
                let index = number("goto", "a phase index", rest)?;
                if index == 0 {
                    return Err(ConsoleError::InvalidArgument {
                        command: "goto",
                        value: rest.to_string(),
                    });
                }
                ConsoleCommand::Goto(index)
            }
            "poll" => ConsoleCommand::Poll,
            "upload" => ConsoleCommand::Upload(PathBuf::from(argument("upload", "a file path", rest)?)),
            "send" => ConsoleCommand::Send(OutboundCommand::parse(argument(
                "send",
                "a token or JSON object",
                rest,
            )?)?),
            "endpoint" => ConsoleCommand::Endpoint(Endpoint::parse(argument("endpoint", "a ws:// address", rest)?)?),
            "connect" => ConsoleCommand::Connect,
            "disconnect" => ConsoleCommand::Disconnect,
            "reconnect" => ConsoleCommand::Reconnect,
            "clear" => ConsoleCommand::Clear,
            "history" => ConsoleCommand::History,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(ConsoleError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn argument<'a>(
    command: &'static str,
    what: &'static str,
    rest: &'a str,
) -> Result<&'a str, ConsoleError> {
    if rest.is_empty() {
        Err(ConsoleError::MissingArgument {
            command,
            argument: what,
        })
    } else {
        Ok(rest)
    }
}

fn number(command: &'static str, what: &'static str, rest: &str) -> Result<u32, ConsoleError> {
    argument(command, what, rest)?
        .parse()
        .map_err(|_| ConsoleError::InvalidArgument {
            command,
            value: rest.to_string(),
        })
}

/// Whether the console keeps reading input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Executes console commands against a link and its telemetry projection
pub struct Console {
    link: DeviceLink,
    telemetry: TelemetryProjection,
}

impl Console {
    pub fn new(link: DeviceLink, telemetry: TelemetryProjection) -> Self {
        Self { link, telemetry }
    }

    /// Parse and execute one input line, returning what to print
    pub async fn run_line(&self, line: &str) -> Result<(Flow, String)> {
        if line.trim().is_empty() {
            return Ok((Flow::Continue, String::new()));
        }
        let command: ConsoleCommand = line.parse()?;
        self.execute(command).await
    }

    pub async fn execute(&self, command: ConsoleCommand) -> Result<(Flow, String)> {
        let output = match command {
            ConsoleCommand::Status => render_status(&self.link.snapshot()),
            ConsoleCommand::Telemetry => render_telemetry(&self.telemetry),
            ConsoleCommand::Pins => render_pins(&self.telemetry),
            ConsoleCommand::History => render_history(&self.telemetry),
            ConsoleCommand::Toggle(pin) => sent(self.telemetry.toggle_pin(pin), "toggle_gpio"),
            ConsoleCommand::Start => self.send(Token::StartCycle),
            ConsoleCommand::Stop => self.send(Token::StopCycle),
            ConsoleCommand::Skip => self.send(Token::SkipPhase),
            ConsoleCommand::Poll => self.send(Token::GetTelemetry),
            ConsoleCommand::Goto(index) => self.send(OutboundCommand::skip_to_phase(index)),
            ConsoleCommand::Send(command) => self.send(command),
            ConsoleCommand::Upload(path) => {
                let phases = load_cycle(&path)?;
                let count = phases.len();
                let result = self.send(OutboundCommand::write_json(phases));
                format!("{} ({} phases from {})", result, count, path.display())
            }
            ConsoleCommand::Endpoint(endpoint) => {
                self.link.update_endpoint(endpoint.as_str()).await?;
                format!("switching to {}", endpoint)
            }
            ConsoleCommand::Connect => {
                self.link.connect().await?;
                "connecting".to_string()
            }
            ConsoleCommand::Disconnect => {
                self.link.disconnect().await?;
                "disconnected".to_string()
            }
            ConsoleCommand::Reconnect => {
                self.link.reconnect().await?;
                "reconnecting".to_string()
            }
            ConsoleCommand::Clear => {
                self.link.clear_error().await?;
                "error cleared".to_string()
            }
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => return Ok((Flow::Quit, String::new())),
        };
        Ok((Flow::Continue, output))
    }

    fn send(&self, command: impl Into<OutboundCommand>) -> String {
        let command = command.into();
        let name = command.name().to_string();
        sent(self.link.send(command), &name)
    }
}

fn sent(ok: bool, name: &str) -> String {
    if ok {
        format!("sent {}", name)
    } else {
        format!("not connected, {} dropped", name)
    }
}

/// Read a cycle definition, either `{"phases": [...]}` or a bare phase array
pub fn load_cycle(path: &Path) -> Result<Vec<Phase>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    if let Ok(upload) = serde_json::from_str::<CycleUpload>(&content) {
        if !upload.phases.is_empty() {
            return Ok(upload.phases);
        }
    }
    serde_json::from_str::<Vec<Phase>>(&content)
        .with_context(|| format!("{} is not a cycle definition", path.display()))
}

pub fn render_status(state: &ConnectionState) -> String {
    let mut out = format!("{} {}", state.endpoint, state.status());
    if let Some(error) = &state.error {
        let _ = write!(out, "\n  error: {}", error);
    }
    let _ = write!(
        out,
        "\n  frames: {} received, {} dropped; connects: {}",
        state.stats.frames_received, state.stats.frames_dropped, state.stats.connects
    );
    out
}

pub fn render_telemetry(telemetry: &TelemetryProjection) -> String {
    let packet = match telemetry.current() {
        Some(packet) => packet,
        None => return "no telemetry yet".to_string(),
    };

    let mut out = format!(
        "t={}ms rpm={:.0} pressure={:.1}Hz",
        packet.timestamp, packet.sensors.rpm, packet.sensors.pressure_freq
    );
    if telemetry.sensor_error() {
        out.push_str(" SENSOR ERROR");
    }

    if telemetry.is_running() {
        let _ = write!(
            out,
            "\n  phase {}/{} {}",
            packet.cycle.current_phase_index,
            packet.cycle.total_phases,
            telemetry.phase_name()
        );
        if let Some(progress) = telemetry.phase_progress() {
            let _ = write!(out, " {:.0}%", progress * 100.0);
        }
        if let Some(elapsed) = telemetry.cycle_elapsed_ms() {
            let _ = write!(out, ", cycle {}s", elapsed / 1000);
        }
        let active: Vec<String> = telemetry
            .active_components()
            .into_iter()
            .map(|c| c.label)
            .collect();
        if !active.is_empty() {
            let _ = write!(out, "\n  active: {}", active.join(", "));
        }
    } else {
        out.push_str("\n  idle");
    }
    out
}

pub fn render_pins(telemetry: &TelemetryProjection) -> String {
    let pins = telemetry.gpio();
    if pins.is_empty() {
        return "no pin data".to_string();
    }
    pins.iter()
        .map(|g| format!("pin {:>2}: {}", g.pin, if g.is_on() { "on" } else { "off" }))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_history(telemetry: &TelemetryProjection) -> String {
    fn summary(name: &str, samples: &[HistorySample]) -> String {
        match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => {
                let max = samples.iter().map(|s| s.value).fold(f64::MIN, f64::max);
                format!(
                    "{}: {} samples {}..{}ms, last {:.1}, max {:.1}",
                    name,
                    samples.len(),
                    first.timestamp_ms,
                    last.timestamp_ms,
                    last.value,
                    max
                )
            }
            _ => format!("{}: empty", name),
        }
    }

    format!(
        "{}\n{}",
        summary("rpm", &telemetry.rpm_history()),
        summary("pressure", &telemetry.pressure_history())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_session::{LinkConfig, MemoryConnector};
    use devlink_wire::{Action, InboundFrame};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!("status".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Status);
        assert_eq!("  QUIT ".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Quit);
        assert_eq!("toggle 4".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Toggle(4));
        assert_eq!("goto 2".parse::<ConsoleCommand>().unwrap(), ConsoleCommand::Goto(2));
        assert_eq!(
            "upload cycles/cotton.json".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Upload(PathBuf::from("cycles/cotton.json"))
        );
    }

    #[test]
    fn test_parse_send_payloads() {
        assert_eq!(
            "send start_cycle".parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Send(OutboundCommand::Token(Token::StartCycle))
        );
        assert_eq!(
            r#"send {"action":"skip_to_phase","index":2}"#.parse::<ConsoleCommand>().unwrap(),
            ConsoleCommand::Send(OutboundCommand::Action(Action::SkipToPhase { index: 2 }))
        );
        assert!(matches!(
            "send {not json".parse::<ConsoleCommand>(),
            Err(ConsoleError::Payload(_))
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(matches!("".parse::<ConsoleCommand>(), Err(ConsoleError::Empty)));
        assert!(matches!("spin".parse::<ConsoleCommand>(), Err(ConsoleError::Unknown(_))));
        assert!(matches!(
            "toggle".parse::<ConsoleCommand>(),
            Err(ConsoleError::MissingArgument { .. })
        ));
        assert!(matches!(
            "toggle four".parse::<ConsoleCommand>(),
            Err(ConsoleError::InvalidArgument { .. })
        ));
        assert!(matches!(
            "goto 0".parse::<ConsoleCommand>(),
            Err(ConsoleError::InvalidArgument { .. })
        ));
        assert!(matches!(
            "endpoint http://10.0.0.1".parse::<ConsoleCommand>(),
            Err(ConsoleError::Endpoint(_))
        ));
    }

    #[test]
    fn test_load_cycle_accepts_both_shapes() {
        let mut wrapped = NamedTempFile::new().unwrap();
        wrapped
            .write_all(br#"{"phases":[{"id":1,"name":"Fill"},{"id":2,"name":"Spin"}]}"#)
            .unwrap();
        let phases = load_cycle(wrapped.path()).unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[1].id, "2");

        let mut bare = NamedTempFile::new().unwrap();
        bare.write_all(br#"[{"id":"p1","name":"Rinse"}]"#).unwrap();
        assert_eq!(load_cycle(bare.path()).unwrap()[0].name, "Rinse");

        let mut junk = NamedTempFile::new().unwrap();
        junk.write_all(b"42").unwrap();
        assert!(load_cycle(junk.path()).is_err());
    }

    fn console() -> Console {
        let mut config = LinkConfig::new(Endpoint::parse("ws://device.test/ws").unwrap());
        config.auto_connect = false;
        let (link, _driver) = DeviceLink::spawn(config, MemoryConnector::new());
        let telemetry = TelemetryProjection::attach(&link, 10);
        Console::new(link, telemetry)
    }

    #[tokio::test]
    async fn test_commands_while_disconnected() {
        let console = console();

        let (flow, output) = console.run_line("start").await.unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(output, "not connected, start_cycle dropped");

        let (_, output) = console.run_line("toggle 4").await.unwrap();
        assert_eq!(output, "not connected, toggle_gpio dropped");

        let (_, output) = console.run_line("status").await.unwrap();
        assert!(output.starts_with("ws://device.test/ws idle"));

        assert!(console.run_line("toggle x").await.is_err());
        assert_eq!(console.run_line("quit").await.unwrap().0, Flow::Quit);
    }

    #[tokio::test]
    async fn test_render_telemetry() {
        let console = console();
        assert_eq!(render_telemetry(&console.telemetry), "no telemetry yet");

        let packet = serde_json::from_str(
            r#"{"timestamp":9000,"gpio":[{"pin":4,"state":0},{"pin":5,"state":1}],
                "sensors":{"rpm":400,"pressure_freq":100.5},
                "cycle":{"running":true,"current_phase_index":1,"current_phase_name":"Fill",
                         "total_phases":2,"phase_elapsed_ms":500,"phase_total_duration_ms":1000,
                         "cycle_start_time":4000},
                "cycle_data":[{"id":"p1","name":"Fill","components":[
                    {"id":"c1","label":"Inlet valve","start":0,"duration":1000}]}]}"#,
        )
        .unwrap();
        console.telemetry.fold(&InboundFrame::Telemetry(packet));

        let output = render_telemetry(&console.telemetry);
        assert!(output.contains("rpm=400"));
        assert!(output.contains("phase 1/2 Fill 50%, cycle 5s"));
        assert!(output.contains("active: Inlet valve"));

        assert_eq!(render_pins(&console.telemetry), "pin  4: on\npin  5: off");
        assert!(render_history(&console.telemetry).starts_with("rpm: 1 samples 9000..9000ms"));
    }
}
