//! `log` – a communication module that writes every transmitted message to
//! the tracing log. Always ready, never fails.

use async_trait::async_trait;
use busgate_middleware::{CommunicationContext, CommunicationModule, Module, ModuleConfig};
use busgate_types::{ModuleError, PublishMessage};
use tracing::info;

#[derive(Debug, Default)]
pub struct LogModule {
    id: String,
    transmitted: u64,
}

impl LogModule {
    /// Messages transmitted since load.
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }
}

#[async_trait]
impl Module for LogModule {
    async fn stop(&mut self) -> Result<(), ModuleError> {
        info!(module = %self.id, transmitted = self.transmitted, "log module stopped");
        Ok(())
    }
}

#[async_trait]
impl CommunicationModule for LogModule {
    async fn load(
        &mut self,
        _config: &ModuleConfig,
        ctx: CommunicationContext,
    ) -> Result<(), ModuleError> {
        self.id = ctx.id;
        Ok(())
    }

    async fn transmit(&mut self, message: &PublishMessage) -> Result<(), ModuleError> {
        info!(
            module = %self.id,
            path = %message.path,
            content = %message.content,
            retained = message.retained,
            qos = message.qos,
            "publish"
        );
        self.transmitted += 1;
        Ok(())
    }
}
