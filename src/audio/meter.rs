use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Perceptual loudness of one audio block, scaled to [0.0, 100.0].
pub fn level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    (energy.sqrt() * 100.0).clamp(0.0, 100.0)
}

/// Snapshot of both call legs taken at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSample {
    pub user: f32,
    pub agent: f32,
}

/// Shared user/agent loudness pair. The capture pump and the playback path
/// update it concurrently, so the levels live in atomics as raw f32 bits and
/// readers never take a lock.
#[derive(Clone, Debug)]
pub struct VolumeMeter {
    user_bits: Arc<AtomicU32>,
    agent_bits: Arc<AtomicU32>,
}

impl VolumeMeter {
    pub fn new() -> Self {
        Self {
            user_bits: Arc::new(AtomicU32::new(0.0f32.to_bits())),
            agent_bits: Arc::new(AtomicU32::new(0.0f32.to_bits())),
        }
    }

    pub fn set_user(&self, level: f32) {
        self.user_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn set_agent(&self, level: f32) {
        self.agent_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn sample(&self) -> VolumeSample {
        VolumeSample {
            user: f32::from_bits(self.user_bits.load(Ordering::Relaxed)),
            agent: f32::from_bits(self.agent_bits.load(Ordering::Relaxed)),
        }
    }

    pub fn reset(&self) {
        self.set_user(0.0);
        self.set_agent(0.0);
    }
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self::new()
    }
}
