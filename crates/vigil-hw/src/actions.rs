//! Protective actions backed by external commands.
//!
//! Each action is an argv list from the configuration. Display power
//! commands are fire-and-forget; unmount and hibernate run to completion
//! so that hibernation is only issued after the unmount has returned.

use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};
use vigil_core::{ActionError, ProtectiveActions};

/// Command lines for each protective action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionCommands {
    pub display_off: Vec<String>,
    pub display_on: Vec<String>,
    pub unmount_secure_volume: Vec<String>,
    pub hibernate_system: Vec<String>,
}

impl Default for ActionCommands {
    fn default() -> Self {
        let argv = |parts: &[&str]| -> Vec<String> { parts.iter().map(|s| s.to_string()).collect() };
        Self {
            display_off: argv(&["xset", "dpms", "force", "off"]),
            display_on: argv(&["xset", "dpms", "force", "on"]),
            unmount_secure_volume: argv(&["veracrypt", "--text", "--dismount", "--force", "--non-interactive"]),
            hibernate_system: argv(&["systemctl", "hibernate"]),
        }
    }
}

impl ActionCommands {
    /// Names of actions whose argv is empty.
    pub fn empty_actions(&self) -> Vec<&'static str> {
        [
            ("display_off", &self.display_off),
            ("display_on", &self.display_on),
            ("unmount_secure_volume", &self.unmount_secure_volume),
            ("hibernate_system", &self.hibernate_system),
        ]
        .into_iter()
        .filter(|(_, argv)| argv.is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// [`ProtectiveActions`] implementation that shells out to the configured
/// commands.
pub struct CommandActions {
    commands: ActionCommands,
}

impl CommandActions {
    pub fn new(commands: ActionCommands) -> Self {
        Self { commands }
    }
}

impl ProtectiveActions for CommandActions {
    fn display_off(&mut self) -> Result<(), ActionError> {
        spawn_detached("display_off", &self.commands.display_off)
    }

    fn display_on(&mut self) -> Result<(), ActionError> {
        spawn_detached("display_on", &self.commands.display_on)
    }

    fn unmount_secure_volume(&mut self) -> Result<(), ActionError> {
        run_to_completion("unmount_secure_volume", &self.commands.unmount_secure_volume)?;
        tracing::info!("secure volume unmounted");
        Ok(())
    }

    fn hibernate_system(&mut self) -> Result<(), ActionError> {
        run_to_completion("hibernate_system", &self.commands.hibernate_system)
    }
}

fn command(action: &'static str, argv: &[String]) -> Result<Command, ActionError> {
    let (program, args) = argv.split_first().ok_or_else(|| ActionError::Spawn {
        action,
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    Ok(cmd)
}

/// Launch without waiting; a helper thread reaps the child.
fn spawn_detached(action: &'static str, argv: &[String]) -> Result<(), ActionError> {
    let mut child = command(action, argv)?
        .spawn()
        .map_err(|source| ActionError::Spawn {
            action,
            program: argv[0].clone(),
            source,
        })?;
    tracing::debug!(action, pid = child.id(), "action launched");
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    Ok(())
}

fn run_to_completion(action: &'static str, argv: &[String]) -> Result<(), ActionError> {
    let status = command(action, argv)?
        .status()
        .map_err(|source| ActionError::Spawn {
            action,
            program: argv[0].clone(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(ActionError::Status {
            action,
            program: argv[0].clone(),
            status: status.to_string(),
        })
    }
}
