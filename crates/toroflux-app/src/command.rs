use std::collections::BTreeMap;

use thiserror::Error;
use toroflux_core::{ControlCommand, WorldState, WorldStateError, apply_control_command};
use tracing::debug;

/// Errors surfaced while driving a world through scheduled commands.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("command rejected at frame {frame}: {source}")]
    Rejected {
        frame: u64,
        #[source]
        source: WorldStateError,
    },
}

/// Tally of commands applied by [`CommandSchedule::apply_due`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedCommands {
    pub floods: usize,
    pub resets: usize,
    pub config_updates: usize,
}

impl AppliedCommands {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.floods + self.resets + self.config_updates
    }

    pub fn merge(&mut self, other: Self) {
        self.floods += other.floods;
        self.resets += other.resets;
        self.config_updates += other.config_updates;
    }
}

/// Control commands keyed by the frame they run before.
///
/// Frames count driver steps from 1 and ignore world resets, so a command
/// scheduled for frame `n` runs right before the `n`-th step.
#[derive(Debug, Clone, Default)]
pub struct CommandSchedule {
    pending: BTreeMap<u64, Vec<ControlCommand>>,
}

impl CommandSchedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `command` before frame `frame`. Commands on the same frame keep insertion order.
    pub fn schedule(&mut self, frame: u64, command: ControlCommand) {
        self.pending.entry(frame).or_default().push(command);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove and return every command due at or before `frame`.
    pub fn take_due(&mut self, frame: u64) -> Vec<ControlCommand> {
        let later = self.pending.split_off(&frame.saturating_add(1));
        let due = std::mem::replace(&mut self.pending, later);
        due.into_values().flatten().collect()
    }

    /// Apply every command due at `frame`.
    pub fn apply_due(
        &mut self,
        world: &mut WorldState,
        frame: u64,
    ) -> Result<AppliedCommands, ControlError> {
        let mut applied = AppliedCommands::default();
        for command in self.take_due(frame) {
            debug!(frame, ?command, "applying control command");
            match &command {
                ControlCommand::TriggerFlood => applied.floods += 1,
                ControlCommand::Reset => applied.resets += 1,
                ControlCommand::UpdateConfig(_) => applied.config_updates += 1,
            }
            apply_control_command(world, command)
                .map_err(|source| ControlError::Rejected { frame, source })?;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toroflux_core::TorofluxConfig;

    fn world() -> WorldState {
        WorldState::new(TorofluxConfig {
            resolution: 8,
            agent_count: 4,
            rng_seed: Some(1),
            ..TorofluxConfig::default()
        })
        .expect("world")
    }

    #[test]
    fn due_commands_drain_in_frame_order() {
        let mut schedule = CommandSchedule::new();
        schedule.schedule(5, ControlCommand::Reset);
        schedule.schedule(2, ControlCommand::TriggerFlood);
        schedule.schedule(2, ControlCommand::Reset);
        assert_eq!(schedule.len(), 3);

        assert!(schedule.take_due(1).is_empty());
        assert_eq!(
            schedule.take_due(3),
            vec![ControlCommand::TriggerFlood, ControlCommand::Reset]
        );
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.take_due(10), vec![ControlCommand::Reset]);
        assert!(schedule.is_empty());
    }

    #[test]
    fn rejected_update_reports_frame() {
        let mut world = world();
        let mut bad = world.config().clone();
        bad.resolution = 1;
        let mut schedule = CommandSchedule::new();
        schedule.schedule(0, ControlCommand::UpdateConfig(Box::new(bad)));

        let err = schedule.apply_due(&mut world, 0).expect_err("rejected");
        assert!(matches!(err, ControlError::Rejected { frame: 0, .. }));
        assert_eq!(world.config().resolution, 8);
    }

    #[test]
    fn flood_command_reaches_world() {
        let mut world = world();
        let mut schedule = CommandSchedule::new();
        schedule.schedule(0, ControlCommand::TriggerFlood);
        let applied = schedule.apply_due(&mut world, 0).expect("applied");
        assert_eq!(applied.floods, 1);
        assert_eq!(applied.total(), 1);
        assert!(world.flood().active);
    }
}
