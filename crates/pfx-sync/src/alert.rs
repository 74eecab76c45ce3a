//! Audible signal raised while a challenge page waits for a human.

use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::{Child, Command};
use tracing::{info, warn};

pub trait AlertSignal: Send + Sync {
    /// Starts the alert, stopping any earlier playback first. Never blocks.
    fn play(&self);
    fn stop(&self);
}

/// Logs instead of making a sound.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlert;

impl AlertSignal for LogAlert {
    fn play(&self) {
        warn!("manual intervention required: solve the challenge in the browser window");
    }

    fn stop(&self) {}
}

/// Plays the alert by spawning an external player, e.g. `mpg123 alert.mp3`.
#[derive(Debug)]
pub struct CommandAlert {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandAlert {
    /// `None` when `command` is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            child: Mutex::new(None),
        })
    }
}

impl AlertSignal for CommandAlert {
    fn play(&self) {
        self.stop();
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Ok(child) => {
                if let Ok(mut slot) = self.child.lock() {
                    *slot = Some(child);
                }
                warn!(program = %self.program, "alert playing; solve the challenge in the browser window");
            }
            Err(err) => warn!(program = %self.program, error = %err, "could not start alert player"),
        }
    }

    fn stop(&self) {
        let Ok(mut slot) = self.child.lock() else {
            return;
        };
        if let Some(mut child) = slot.take() {
            if let Err(err) = child.start_kill() {
                info!(error = %err, "alert player already exited");
            }
        }
    }
}

pub fn alert_from_command(command: Option<&[String]>) -> Box<dyn AlertSignal> {
    match command.and_then(CommandAlert::new) {
        Some(alert) => Box::new(alert),
        None => Box::new(LogAlert),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_falls_back_to_logging() {
        assert!(CommandAlert::new(&[]).is_none());
        let alert = alert_from_command(Some(&[]));
        alert.play();
        alert.stop();
    }

    #[cfg(unix)]
    fn running(alert: &CommandAlert) -> bool {
        let mut slot = alert.child.lock().expect("lock");
        matches!(slot.as_mut().map(Child::try_wait), Some(Ok(None)))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn replaying_replaces_the_previous_player() {
        let alert = CommandAlert::new(&["sleep".to_string(), "30".to_string()]).expect("command");
        alert.play();
        assert!(running(&alert));
        alert.play();
        assert!(running(&alert));
        alert.stop();
        assert!(!running(&alert));
    }
}
