use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerConfig {
    /// How long a pending tree may wait for its required tiles before it is
    /// activated anyway.
    pub activation_timeout: Duration,
}

impl Default for FrameSchedulerConfig {
    fn default() -> Self {
        Self {
            activation_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerInput {
    pub frame_sequence_id: u64,
    pub now: Instant,
    /// When the current pending tree was committed, if there is one.
    pub pending_tree_created_at: Option<Instant>,
    pub ready_to_activate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationReason {
    Ready,
    ForcedTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerDecision {
    pub frame_sequence_id: u64,
    pub activate: Option<ActivationReason>,
    /// A pending tree exists but is still blocked on required tiles.
    pub waiting_for_tiles: bool,
}

#[derive(Debug, Clone)]
pub struct FrameScheduler {
    config: FrameSchedulerConfig,
    forced_activations: u64,
}

impl FrameScheduler {
    pub fn new(config: FrameSchedulerConfig) -> Self {
        Self {
            config,
            forced_activations: 0,
        }
    }

    pub fn config(&self) -> FrameSchedulerConfig {
        self.config
    }

    pub fn set_config(&mut self, config: FrameSchedulerConfig) {
        self.config = config;
    }

    /// Activations that went ahead before every required tile was ready.
    pub fn forced_activations(&self) -> u64 {
        self.forced_activations
    }

    /// Instant at which a pending tree created at `created_at` stops waiting.
    pub fn activation_deadline(&self, created_at: Instant) -> Instant {
        created_at + self.config.activation_timeout
    }

    pub fn schedule_frame(&mut self, input: FrameSchedulerInput) -> FrameSchedulerDecision {
        let Some(created_at) = input.pending_tree_created_at else {
            return FrameSchedulerDecision {
                frame_sequence_id: input.frame_sequence_id,
                activate: None,
                waiting_for_tiles: false,
            };
        };

        if input.ready_to_activate {
            return FrameSchedulerDecision {
                frame_sequence_id: input.frame_sequence_id,
                activate: Some(ActivationReason::Ready),
                waiting_for_tiles: false,
            };
        }

        if input.now >= self.activation_deadline(created_at) {
            self.forced_activations += 1;
            return FrameSchedulerDecision {
                frame_sequence_id: input.frame_sequence_id,
                activate: Some(ActivationReason::ForcedTimeout),
                waiting_for_tiles: false,
            };
        }

        FrameSchedulerDecision {
            frame_sequence_id: input.frame_sequence_id,
            activate: None,
            waiting_for_tiles: true,
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(FrameSchedulerConfig::default())
    }
}
