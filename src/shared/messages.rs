//! Operator actions and console commands

use std::str::FromStr;

/// Discrete operator actions, none take parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    /// Start or stop the sampling loop
    ToggleScan,
    StartCamera,
    StopCamera,
    /// Reset the OCR engine and try the tiers again
    RetryOcr,
    /// Manual playback for platforms that block autoplay
    ForcePlay,
    /// Switch between masked and full number
    ToggleReveal,
}

/// A line typed into the operator console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Action(OperatorAction),
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub const HELP: &'static str = "commands: scan, start, stop, retry, play, reveal, status, help, quit";
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s.trim().to_ascii_lowercase().as_str() {
            "scan" | "s" => ConsoleCommand::Action(OperatorAction::ToggleScan),
            "start" => ConsoleCommand::Action(OperatorAction::StartCamera),
            "stop" => ConsoleCommand::Action(OperatorAction::StopCamera),
            "retry" => ConsoleCommand::Action(OperatorAction::RetryOcr),
            "play" => ConsoleCommand::Action(OperatorAction::ForcePlay),
            "reveal" | "r" => ConsoleCommand::Action(OperatorAction::ToggleReveal),
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "scan".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Action(OperatorAction::ToggleScan))
        );
        assert_eq!(
            "  RETRY \n".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Action(OperatorAction::RetryOcr))
        );
        assert_eq!(
            "play".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Action(OperatorAction::ForcePlay))
        );
        assert_eq!("q".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit));
        assert_eq!("status".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Status));
    }

    #[test]
    fn test_unknown_command() {
        let err = "launch".parse::<ConsoleCommand>().unwrap_err();
        assert!(err.contains("launch"));
    }
}
