//! Decorative progress animation shown while a query is being answered.
//!
//! The ticks run for a fixed duration before the real call and say nothing
//! about how far along the model actually is.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::sleep;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            steps: default_steps(),
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_steps() -> u32 {
    100
}

fn default_step_delay_ms() -> u64 {
    50
}

impl ProgressConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn total_duration(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        Duration::from_millis(self.step_delay_ms.saturating_mul(u64::from(self.steps)))
    }
}

/// Emits `progress:<pct>` lines on a broadcast channel.
#[derive(Clone)]
pub struct Progress {
    config: ProgressConfig,
    events: broadcast::Sender<String>,
}

impl Progress {
    pub fn new(config: ProgressConfig, events: broadcast::Sender<String>) -> Self {
        Self { config, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    /// Ticks through every step, then clears the indicator with `progress:done`.
    pub async fn run(&self) {
        if !self.config.enabled || self.config.steps == 0 {
            return;
        }
        let delay = Duration::from_millis(self.config.step_delay_ms);
        for step in 1..=self.config.steps {
            sleep(delay).await;
            let pct = percent(step, self.config.steps);
            // Err only means no page is subscribed.
            let _ = self.events.send(format!("progress:{pct}"));
        }
        let _ = self.events.send("progress:done".to_string());
    }
}

fn percent(step: u32, steps: u32) -> u64 {
    u64::from(step).saturating_mul(100) / u64::from(steps.max(1))
}
