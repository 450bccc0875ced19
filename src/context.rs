use crate::binance::HttpKlineSource;
use crate::config::PipelineSettings;
use crate::logging::Logger;
use crate::pipeline::Pipeline;
use crate::retriever::Retriever;
use anyhow::{Context, Result};

/// Settings and the injected logger shared by every command.
#[derive(Clone)]
pub struct AppContext {
    settings: PipelineSettings,
    logger: Logger,
}

impl AppContext {
    pub fn initialize(settings: PipelineSettings, logger: Logger) -> Self {
        Self { settings, logger }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// A pipeline that retrieves from the configured klines endpoint.
    pub fn http_pipeline(&self) -> Result<Pipeline<HttpKlineSource>> {
        let source = HttpKlineSource::new(
            &self.settings.base_url,
            self.settings.http_timeout,
            self.logger.with_target("crypto_metrics::binance"),
        )
        .with_context(|| {
            format!(
                "Failed to build HTTP client for {}",
                self.settings.base_url
            )
        })?;
        let retriever = Retriever::new(
            source,
            self.settings.fetch.clone(),
            self.logger.with_target("crypto_metrics::retriever"),
        );
        Ok(Pipeline::new(
            retriever,
            self.settings.windows,
            self.logger.with_target("crypto_metrics::pipeline"),
        ))
    }
}
