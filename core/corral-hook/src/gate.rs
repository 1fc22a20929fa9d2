//! Pre-operation gate handler.
//!
//! Reads a JSON event from stdin, runs the conflict check, and prints the
//! decision as JSON. Exit codes: 0 = allow (or warn-and-proceed), 2 = the
//! operation is blocked, 1 = internal failure.
//!
//! Events without a target path carry nothing to guard and are allowed
//! through without store traffic.

use std::io::{self, Read};

use corral_core::{Conflict, Coordinator, GateDecision};
use serde::Deserialize;
use tracing::{debug, error};

const EXIT_ALLOW: i32 = 0;
const EXIT_INTERNAL: i32 = 1;
const EXIT_BLOCK: i32 = 2;

#[derive(Debug, Deserialize)]
struct GateInput {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    hook_event_name: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
}

pub fn run() -> i32 {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input) {
        error!(error = %e, "Failed to read stdin");
        return EXIT_INTERNAL;
    }
    if input.trim().is_empty() {
        return EXIT_ALLOW;
    }

    let event: GateInput = match serde_json::from_str(&input) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "Failed to parse gate input");
            return EXIT_INTERNAL;
        }
    };

    let Some(session_id) = event.session_id else {
        debug!("Skipping gate event (missing session_id)");
        return EXIT_ALLOW;
    };
    let Some(file_path) = event.file_path else {
        debug!(session = %session_id, "Skipping gate event (no target path)");
        return EXIT_ALLOW;
    };

    let kind = event
        .tool_name
        .or(event.hook_event_name)
        .unwrap_or_else(|| "edit".to_string());

    let decision = match Coordinator::open_default() {
        Ok(coordinator) => coordinator.pre_operation(&kind, &file_path, &session_id),
        Err(e) => {
            // Unreachable coordination never silently permits a write.
            error!(error = %e, "Coordinator unavailable; failing closed");
            GateDecision::Block {
                conflict: unknown_conflict(&file_path),
                busy: Vec::new(),
            }
        }
    };

    match serde_json::to_string(&decision) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!(error = %e, "Failed to serialize gate decision");
            return EXIT_INTERNAL;
        }
    }

    match decision {
        GateDecision::Allow { .. } | GateDecision::Warn { .. } => EXIT_ALLOW,
        GateDecision::Block { .. } => EXIT_BLOCK,
    }
}

fn unknown_conflict(file_path: &str) -> Conflict {
    Conflict {
        resource_id: corral_core::resource::resource_id(file_path),
        held_by: corral_core::UNKNOWN_OWNER.to_string(),
        reason: None,
        expires_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_input_tolerates_extra_fields() {
        let input: GateInput = serde_json::from_str(
            r#"{
                "session_id": "host-1-1",
                "hook_event_name": "PreToolUse",
                "tool_name": "Edit",
                "file_path": "src/auth.py",
                "cwd": "/repo",
                "unrelated": {"nested": true}
            }"#,
        )
        .unwrap();
        assert_eq!(input.session_id.as_deref(), Some("host-1-1"));
        assert_eq!(input.tool_name.as_deref(), Some("Edit"));
        assert_eq!(input.file_path.as_deref(), Some("src/auth.py"));
    }

    #[test]
    fn gate_input_fields_all_default_to_none() {
        let input: GateInput = serde_json::from_str("{}").unwrap();
        assert!(input.session_id.is_none());
        assert!(input.file_path.is_none());
        assert!(input.hook_event_name.is_none());
    }
}
