use crate::telemetry::DensityLevel;

pub const DEFAULT_COOLDOWN_SECS: u32 = 30;
pub const DEFAULT_COOLDOWN_STEP_SECS: u32 = 5;

/// Countdown that restarts on every Heavy tick and decays otherwise.
#[derive(Debug, Clone)]
pub struct CooldownTimer {
    reset_secs: u32,
    step_secs: u32,
    remaining_secs: u32,
}

impl CooldownTimer {
    pub fn new(reset_secs: u32, step_secs: u32) -> Self {
        Self {
            reset_secs,
            step_secs,
            remaining_secs: 0,
        }
    }

    pub fn on_tick(&mut self, density: DensityLevel) -> u32 {
        if density == DensityLevel::Heavy {
            self.remaining_secs = self.reset_secs;
        } else {
            self.remaining_secs = self.remaining_secs.saturating_sub(self.step_secs);
        }
        self.remaining_secs
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }
}

impl Default for CooldownTimer {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_SECS, DEFAULT_COOLDOWN_STEP_SECS)
    }
}
