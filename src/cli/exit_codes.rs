//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::config::ConfigError;
use crate::core::transport::FatalError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Protocol error
    pub const PROTOCOL_ERROR: u8 = 9;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// Every code the program can exit with
    pub const ALL: [u8; 7] = [
        Self::SUCCESS,
        Self::ERROR,
        Self::INVALID_ARGS,
        Self::CONNECTION_FAILED,
        Self::CONFIG_ERROR,
        Self::PROTOCOL_ERROR,
        Self::PORT_NOT_FOUND,
    ];
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        8 => "Configuration error",
        9 => "Protocol error",
        14 => "Port not found",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

/// Pick the exit code for an error that ended the program
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(FatalError::ChannelUnavailable { reason, .. }) =
            cause.downcast_ref::<FatalError>()
        {
            return if reason.starts_with("no such device") {
                ExitCodes::PORT_NOT_FOUND
            } else {
                ExitCodes::CONNECTION_FAILED
            };
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCodes::CONFIG_ERROR;
        }
        if cause.downcast_ref::<crate::core::protocol::ProtocolError>().is_some() {
            return ExitCodes::PROTOCOL_ERROR;
        }
        if cause.downcast_ref::<hex::FromHexError>().is_some() {
            return ExitCodes::INVALID_ARGS;
        }
    }
    ExitCodes::ERROR
}

/// Convert an outcome to a process exit code, reporting the error on stderr
pub fn finish(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(err) => {
            let code = exit_code_for(&err);
            eprintln!("Error: {err:#}");
            tracing::debug!(code, description = exit_code_description(code), "Exiting");
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::ProtocolError;

    #[test]
    fn test_channel_unavailable_maps_to_connection_failed() {
        let err = anyhow::Error::new(FatalError::ChannelUnavailable {
            port: "/dev/ttyUSB0".to_string(),
            reason: "permission denied".to_string(),
        });
        assert_eq!(exit_code_for(&err), ExitCodes::CONNECTION_FAILED);
    }

    #[test]
    fn test_missing_port_maps_to_port_not_found() {
        let err = anyhow::Error::new(FatalError::ChannelUnavailable {
            port: "COM7".to_string(),
            reason: "no such device".to_string(),
        })
        .context("Opening sensor link");
        assert_eq!(exit_code_for(&err), ExitCodes::PORT_NOT_FOUND);
    }

    #[test]
    fn test_config_and_protocol_errors() {
        let err = anyhow::Error::new(ConfigError::Invalid("bad".into()));
        assert_eq!(exit_code_for(&err), ExitCodes::CONFIG_ERROR);

        let err = anyhow::Error::new(ProtocolError::TruncatedFrame {
            expected: 7,
            actual: 3,
        });
        assert_eq!(exit_code_for(&err), ExitCodes::PROTOCOL_ERROR);

        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), ExitCodes::ERROR);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(exit_code_description(ExitCodes::SUCCESS), "Success");
        assert_eq!(exit_code_description(ExitCodes::CONNECTION_FAILED), "Connection failed");
        assert_eq!(exit_code_description(200), "Unknown error");
    }

    #[test]
    fn test_every_listed_code_is_described() {
        for code in ExitCodes::ALL {
            assert_ne!(exit_code_description(code), "Unknown error", "code {code}");
        }
        assert_eq!(exit_code_description(127), "Unknown error");
    }
}
