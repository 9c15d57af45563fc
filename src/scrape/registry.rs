//! Assembly of the engine from configuration, and batch submission

use crate::adapter::MarketplaceAdapter;
use crate::config::{Config, HandlerConfig};
use crate::engine::{EngineSettings, ProcessingEngine};
use crate::scrape::BatchHandler;
use crate::session::{payload_hash, CredentialBundle, HttpSessionFactory, HttpSettings};
use crate::storage::{NewBatch, Storage};
use crate::ConfigError;
use std::sync::Arc;
use url::Url;

/// A ready-to-run engine plus what startup recovery did
pub struct EngineParts {
    pub engine: ProcessingEngine,

    /// Stale batches failed while registering handlers
    pub stale_recovered: usize,
}

/// Builds the session factory for one handler's HTTP settings
pub fn session_factory(config: &HandlerConfig) -> HttpSessionFactory {
    let mut settings = HttpSettings::new(&config.http.user_agent, config.http.request_timeout());
    settings.additional_headers = config
        .http
        .headers
        .iter()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect();
    HttpSessionFactory::new(settings)
}

fn marketplace_adapter(config: &HandlerConfig) -> Result<MarketplaceAdapter, ConfigError> {
    let base_url = Url::parse(&config.site.base_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("{}: {}", config.site.base_url, e))
    })?;

    Ok(MarketplaceAdapter::new(
        &config.name,
        base_url,
        &config.site.list_path,
        &config.site.detail_template,
    ))
}

/// Registers one batch handler per configured handler
///
/// Stale batches of each handler are failed before it is registered.
pub fn build_engine(config: &Config, storage: Arc<dyn Storage>) -> crate::Result<EngineParts> {
    let mut engine = ProcessingEngine::new(EngineSettings {
        worker_count: config.engine.worker_count,
        queue_capacity: config.engine.queue_capacity,
    });
    let mut stale_recovered = 0;

    for handler_config in &config.handlers {
        let handler = match handler_config.adapter.as_str() {
            "marketplace" => BatchHandler::new(
                Arc::new(marketplace_adapter(handler_config)?),
                Arc::new(session_factory(handler_config)),
                Arc::clone(&storage),
                handler_config.http.request_delay(),
            ),
            other => {
                return Err(ConfigError::Validation(format!(
                    "handler '{}' uses unknown adapter '{}'",
                    handler_config.name, other
                ))
                .into())
            }
        };

        stale_recovered += handler.recover_stale(config.engine.stale_batch_grace())?;

        engine.register(
            &handler_config.name,
            Arc::new(handler),
            handler_config.max_items_per_cycle,
            &handler_config.purpose,
        )?;
    }

    Ok(EngineParts {
        engine,
        stale_recovered,
    })
}

/// Result of submitting a credential bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new batch was queued
    Queued { batch_id: i64 },

    /// The same payload is already queued or running
    Duplicate { batch_id: i64 },
}

/// Queues a batch for `processor_name` from a serialized credential bundle
///
/// The payload is stored verbatim and its hash becomes the batch's file
/// hash. A payload identical to one still queued or started is refused.
pub fn submit_credentials(
    storage: &dyn Storage,
    processor_name: &str,
    payload: &str,
) -> crate::Result<SubmitOutcome> {
    CredentialBundle::from_json(payload)?;
    let file_hash = payload_hash(payload);

    if let Some(existing) = storage.find_batch_by_hash(processor_name, &file_hash)? {
        if !existing.status.is_terminal() {
            tracing::info!(
                "Payload already submitted as batch {} ({})",
                existing.id,
                existing.status
            );
            return Ok(SubmitOutcome::Duplicate {
                batch_id: existing.id,
            });
        }
    }

    let batch_id = storage.create_batch(&NewBatch {
        processor_name: processor_name.to_string(),
        credential_payload: payload.to_string(),
        file_hash,
    })?;
    tracing::info!("Queued batch {} for {}", batch_id, processor_name);

    Ok(SubmitOutcome::Queued { batch_id })
}
