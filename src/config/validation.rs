use super::AppConfig;
use anyhow::{bail, Result};
use clap::Parser;

/// Hard bounds on the capture block size; below this the per-block overhead
/// dominates, above it the UI volume feedback becomes too coarse.
const MIN_BLOCK_SAMPLES: usize = 256;
const MAX_BLOCK_SAMPLES: usize = 65_536;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize them.
    pub fn validate(&mut self) -> Result<()> {
        if !(MIN_BLOCK_SAMPLES..=MAX_BLOCK_SAMPLES).contains(&self.block_samples) {
            bail!(
                "--block-samples must be between {MIN_BLOCK_SAMPLES} and {MAX_BLOCK_SAMPLES}, got {}",
                self.block_samples
            );
        }
        if !(8..=1024).contains(&self.frame_channel_capacity) {
            bail!(
                "--frame-channel-capacity must be between 8 and 1024, got {}",
                self.frame_channel_capacity
            );
        }
        if self.model.trim().is_empty() {
            bail!("--model must not be empty");
        }
        if self.voice.trim().is_empty() {
            bail!("--voice must not be empty");
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            bail!(
                "--endpoint must be a ws:// or wss:// URL, got {}",
                self.endpoint
            );
        }
        if let Some(device) = &self.input_device {
            if device.trim().is_empty() {
                self.input_device = None;
            }
        }
        Ok(())
    }
}
