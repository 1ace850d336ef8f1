//! Action sinks and trigger dispatch.
//!
//! A trigger resolves through the `GestureMapping` to an action string which
//! the sink launches. Outcomes are reported, never raised: an unmapped gesture
//! is informational and a failed launch still consumes the episode.

use anyhow::{anyhow, Context, Result};
use std::process::{Command, Stdio};

use crate::mapping::GestureMapping;
use crate::trigger::TriggerEvent;

/// Launches the program behind an action identifier.
pub trait ActionSink: Send {
    fn launch(&mut self, action: &str) -> Result<()>;
}

/// Spawns actions as detached processes.
///
/// The action is split on whitespace into program and arguments. Standard
/// streams go to the null device and the child is reaped on a background
/// thread.
#[derive(Clone, Debug, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ActionSink for ProcessLauncher {
    fn launch(&mut self, action: &str) -> Result<()> {
        let mut parts = action.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("action is empty"))?;
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("launch {}", program))?;

        let pid = child.id();
        std::thread::Builder::new()
            .name("action-reaper".to_string())
            .spawn(move || match child.wait() {
                Ok(status) => log::debug!("action: pid {} exited with {}", pid, status),
                Err(err) => log::warn!("action: wait on pid {} failed: {}", pid, err),
            })
            .context("spawn reaper thread")?;
        log::info!("action: launched '{}' (pid {})", action, pid);
        Ok(())
    }
}

/// Logs what would be launched and records it.
#[derive(Clone, Debug, Default)]
pub struct DryRunSink {
    launched: Vec<String>,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launched(&self) -> &[String] {
        &self.launched
    }
}

impl ActionSink for DryRunSink {
    fn launch(&mut self, action: &str) -> Result<()> {
        log::info!("action: dry run, would launch '{}'", action);
        self.launched.push(action.to_string());
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    Launched { action: String },
    Unmapped,
    LaunchFailed { action: String, error: String },
}

/// A trigger together with what happened to it.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerReport {
    pub event: TriggerEvent,
    pub outcome: TriggerOutcome,
}

/// Resolve `event` through `mapping` and hand the action to `sink`.
pub fn dispatch(
    event: &TriggerEvent,
    mapping: &GestureMapping,
    sink: &mut dyn ActionSink,
) -> TriggerOutcome {
    let Some(action) = mapping.get(event.gesture) else {
        log::info!(
            "action: {} detected but no action is mapped",
            event.gesture.label()
        );
        return TriggerOutcome::Unmapped;
    };
    match sink.launch(action) {
        Ok(()) => TriggerOutcome::Launched {
            action: action.to_string(),
        },
        Err(err) => {
            log::warn!("action: failed to launch '{}': {:#}", action, err);
            TriggerOutcome::LaunchFailed {
                action: action.to_string(),
                error: format!("{:#}", err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::GestureClass;
    use std::time::Instant;

    struct FailingSink;

    impl ActionSink for FailingSink {
        fn launch(&mut self, action: &str) -> Result<()> {
            Err(anyhow!("{} not installed", action))
        }
    }

    fn event(gesture: GestureClass) -> TriggerEvent {
        TriggerEvent {
            gesture,
            confidence: 0.9,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn mapped_gesture_is_launched() {
        let mut mapping = GestureMapping::new();
        mapping.set(GestureClass::ThumbsUp, "media_player");
        let mut sink = DryRunSink::new();

        let outcome = dispatch(&event(GestureClass::ThumbsUp), &mapping, &mut sink);
        assert_eq!(
            outcome,
            TriggerOutcome::Launched {
                action: "media_player".to_string()
            }
        );
        assert_eq!(sink.launched(), ["media_player".to_string()]);
    }

    #[test]
    fn unmapped_gesture_does_not_touch_sink() {
        let mut sink = DryRunSink::new();
        let outcome = dispatch(&event(GestureClass::Fist), &GestureMapping::new(), &mut sink);
        assert_eq!(outcome, TriggerOutcome::Unmapped);
        assert!(sink.launched().is_empty());
    }

    #[test]
    fn launch_failure_is_reported() {
        let mut mapping = GestureMapping::new();
        mapping.set(GestureClass::Pointing, "browser");
        let outcome = dispatch(&event(GestureClass::Pointing), &mapping, &mut FailingSink);
        match outcome {
            TriggerOutcome::LaunchFailed { action, error } => {
                assert_eq!(action, "browser");
                assert!(error.contains("not installed"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn process_launcher_reports_missing_program() {
        let mut launcher = ProcessLauncher::new();
        assert!(launcher.launch("   ").is_err());
        assert!(launcher
            .launch("/nonexistent/gesture-launcher-test-binary --flag")
            .is_err());
    }
}
