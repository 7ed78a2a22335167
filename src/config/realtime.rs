//! Real-time delivery configuration

use serde::Deserialize;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Messages queued per connection before sends report backpressure
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl RealtimeConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.outbound_buffer == 0 {
            return Err(ValidationError::InvalidOutboundBuffer);
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

fn default_outbound_buffer() -> usize {
    256
}
