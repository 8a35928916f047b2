// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RPC command/response types exchanged on `ghost:commands` and
//! `ghost:responses`, and their positional binary codec.

use std::collections::HashMap;

use ghost_core::ProcessId;
use serde::{Deserialize, Serialize};

use crate::codec::{Reader, Writer};
use crate::error::ProtocolError;

/// Kind of RPC the Command Processor dispatches on. Unknown wire tags are
/// preserved as `Unknown` rather than rejected, per §4.G's "unknown command"
/// rule — the caller gets an error response instead of a dropped connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Ping,
    Register,
    Start,
    Stop,
    Restart,
    Status,
    Run,
    Connections,
    #[serde(other)]
    Unknown,
}

impl CommandType {
    fn tag(&self) -> u8 {
        match self {
            CommandType::Ping => 0,
            CommandType::Register => 1,
            CommandType::Start => 2,
            CommandType::Stop => 3,
            CommandType::Restart => 4,
            CommandType::Status => 5,
            CommandType::Run => 6,
            CommandType::Connections => 7,
            CommandType::Unknown => 255,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CommandType::Ping => "ping",
            CommandType::Register => "register",
            CommandType::Start => "start",
            CommandType::Stop => "stop",
            CommandType::Restart => "restart",
            CommandType::Status => "status",
            CommandType::Run => "run",
            CommandType::Connections => "connections",
            CommandType::Unknown => "unknown",
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => CommandType::Ping,
            1 => CommandType::Register,
            2 => CommandType::Start,
            3 => CommandType::Stop,
            4 => CommandType::Restart,
            5 => CommandType::Status,
            6 => CommandType::Run,
            7 => CommandType::Connections,
            _ => CommandType::Unknown,
        }
    }

    /// Parse the wire-string form used by `Parameters`-style lookups and CLI dispatch.
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "ping" => CommandType::Ping,
            "register" => CommandType::Register,
            "start" => CommandType::Start,
            "stop" => CommandType::Stop,
            "restart" => CommandType::Restart,
            "status" => CommandType::Status,
            "run" => CommandType::Run,
            "connections" => CommandType::Connections,
            _ => CommandType::Unknown,
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An inbound RPC request published on `ghost:commands` (or a per-process
/// targeted channel). `parameters` carries simple string arguments;
/// `data` carries a binary payload for commands like `register` that accept
/// a full serialized body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCommand {
    pub command_id: String,
    pub command_type: CommandType,
    pub target_process_id: Option<ProcessId>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

impl SystemCommand {
    /// The channel responses to this command should be published on.
    pub fn response_channel(&self) -> &str {
        self.parameters
            .get("responseChannel")
            .map(String::as_str)
            .unwrap_or("ghost:responses")
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.str(&self.command_id);
        w.u8(self.command_type.tag());
        w.opt_str(self.target_process_id.as_ref().map(|id| id.as_str()));
        w.string_map(&self.parameters);
        w.opt_bytes(self.data.as_deref());
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(bytes);
        let command_id = r.str()?;
        let command_type = CommandType::from_tag(r.u8()?);
        let target_process_id = r.opt_str()?.map(ProcessId::from_string);
        let parameters = r.string_map()?;
        let data = r.opt_bytes()?;
        Ok(Self {
            command_id,
            command_type,
            target_process_id,
            parameters,
            data,
        })
    }
}

/// The Command Processor's reply, published on [`SystemCommand::response_channel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<Vec<u8>>,
    pub timestamp: u64,
}

impl CommandResponse {
    pub fn ok(command_id: impl Into<String>, timestamp: u64, data: Option<Vec<u8>>) -> Self {
        Self {
            command_id: command_id.into(),
            success: true,
            error: None,
            data,
            timestamp,
        }
    }

    pub fn failure(command_id: impl Into<String>, timestamp: u64, error: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            success: false,
            error: Some(error.into()),
            data: None,
            timestamp,
        }
    }

    /// Response for a `CommandType::Unknown` request, per §4.G.
    pub fn unknown_command(command_id: impl Into<String>, timestamp: u64) -> Self {
        Self::failure(command_id, timestamp, "unknown command")
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.str(&self.command_id);
        w.u8(self.success as u8);
        w.opt_str(self.error.as_deref());
        w.opt_bytes(self.data.as_deref());
        w.u64(self.timestamp);
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(bytes);
        let command_id = r.str()?;
        let success = match r.u8()? {
            0 => false,
            1 => true,
            tag => return Err(ProtocolError::UnknownTag(tag, "bool")),
        };
        let error = r.opt_str()?;
        let data = r.opt_bytes()?;
        let timestamp = r.u64()?;
        Ok(Self {
            command_id,
            success,
            error,
            data,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_roundtrips_through_binary_codec() {
        let mut parameters = HashMap::new();
        parameters.insert("processId".to_string(), "proc-abc".to_string());

        let cmd = SystemCommand {
            command_id: "cmd-1".into(),
            command_type: CommandType::Start,
            target_process_id: Some(ProcessId::from_string("proc-abc")),
            parameters,
            data: None,
        };
        let decoded = SystemCommand::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded.command_id, cmd.command_id);
        assert_eq!(decoded.command_type, CommandType::Start);
        assert_eq!(decoded.target_process_id, cmd.target_process_id);
        assert_eq!(decoded.parameters, cmd.parameters);
    }

    #[test]
    fn response_roundtrips_through_binary_codec() {
        let resp = CommandResponse::failure("cmd-1", 42, "NotFound: proc-xyz");
        let decoded = CommandResponse::decode(&resp.encode()).unwrap();
        assert!(!decoded.success);
        assert_eq!(decoded.error.as_deref(), Some("NotFound: proc-xyz"));
        assert_eq!(decoded.timestamp, 42);
    }

    #[test]
    fn unknown_command_type_falls_back_on_unrecognized_tag() {
        assert_eq!(CommandType::from_tag(200), CommandType::Unknown);
        assert_eq!(CommandType::from_str_lenient("bogus"), CommandType::Unknown);
    }

    #[test]
    fn unknown_command_response_matches_spec_wording() {
        let resp = CommandResponse::unknown_command("cmd-2", 0);
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("unknown command"));
    }
}
