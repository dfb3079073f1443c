//! Scheduled entry point: one [`SyncJob`] per configured (chain, provider)
//! job, invoked by an external scheduler.

use crate::config::JobConfig;
use crate::error::SyncError;
use crate::facilitators::{Facilitator, FacilitatorAddressConfig, FacilitatorRegistry};
use crate::pagination::{self, PageSink};
use crate::provider::{FetchContext, ProviderTransport};
use crate::repository::{Database, TransferEvent, TransferEventRepository};
use crate::watermark::resolve_since_async;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, error, info, info_span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressOutcome {
    pub facilitator_id: String,
    pub address: String,
    pub since: DateTime<Utc>,
    pub fetched: usize,
    pub saved: usize,
    pub requests: usize,
}

impl AddressOutcome {
    pub fn duplicates(&self) -> usize {
        self.fetched.saturating_sub(self.saved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFailure {
    pub facilitator_id: String,
    pub address: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub job: String,
    pub synced: Vec<AddressOutcome>,
    pub failures: Vec<AddressFailure>,
    pub skipped: usize,
}

impl RunSummary {
    pub fn total_fetched(&self) -> usize {
        self.synced.iter().map(|o| o.fetched).sum()
    }

    pub fn total_saved(&self) -> usize {
        self.synced.iter().map(|o| o.saved).sum()
    }
}

/// Writes every page straight to the store and keeps the counters the
/// per-address summary is logged from.
struct PersistingSink {
    db: Database,
    fetched: usize,
    saved: usize,
}

#[async_trait]
impl PageSink for PersistingSink {
    async fn on_page(&mut self, events: Vec<TransferEvent>) -> Result<(), SyncError> {
        self.fetched += events.len();
        if events.is_empty() {
            return Ok(());
        }

        let inserted = self
            .db
            .run_blocking(move |conn| TransferEventRepository::new(conn).insert_batch(&events))
            .await?;
        self.saved += inserted;
        Ok(())
    }
}

pub struct SyncJob {
    config: JobConfig,
    registry: Arc<FacilitatorRegistry>,
    transport: Arc<dyn ProviderTransport>,
    db: Database,
}

impl SyncJob {
    pub fn new(
        config: JobConfig,
        registry: Arc<FacilitatorRegistry>,
        transport: Arc<dyn ProviderTransport>,
        db: Database,
    ) -> Self {
        Self {
            config,
            registry,
            transport,
            db,
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<RunSummary, SyncError> {
        self.run_at(Utc::now()).await
    }

    /// Sync every selected address up to `now`.
    ///
    /// A failing address is logged and recorded and the run moves on to the
    /// next one. If any address failed the whole run still returns
    /// [`SyncError::PartialFailure`] so the scheduler treats it as failed.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunSummary, SyncError> {
        let job = &self.config;
        let started = Instant::now();
        let mut summary = RunSummary {
            job: job.name.clone(),
            ..Default::default()
        };

        info!(
            job = %job.name,
            chain = %job.chain,
            provider = %job.provider,
            page_limit = job.pagination.limit(),
            %now,
            "starting sync run"
        );

        for facilitator in self.selected_facilitators() {
            for address in facilitator.addresses_on(job.chain) {
                if !address.enabled {
                    info!(
                        facilitator = %facilitator.id,
                        address = %address.address,
                        chain = %job.chain,
                        "address disabled, skipping"
                    );
                    summary.skipped += 1;
                    continue;
                }

                let span = info_span!(
                    "sync_address",
                    chain = %job.chain,
                    provider = %job.provider,
                    facilitator = %facilitator.id,
                    address = %address.address,
                );

                match self.sync_address(facilitator, address, now).instrument(span).await {
                    Ok(outcome) => summary.synced.push(outcome),
                    Err(e) => {
                        error!(
                            chain = %job.chain,
                            provider = %job.provider,
                            facilitator = %facilitator.id,
                            address = %address.address,
                            error = %e,
                            "address sync failed"
                        );
                        summary.failures.push(AddressFailure {
                            facilitator_id: facilitator.id.clone(),
                            address: address.address.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            job = %job.name,
            fetched = summary.total_fetched(),
            saved = summary.total_saved(),
            failed = summary.failures.len(),
            skipped = summary.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync run finished"
        );

        if summary.failures.is_empty() {
            Ok(summary)
        } else {
            Err(SyncError::PartialFailure(Box::new(summary)))
        }
    }

    fn selected_facilitators(&self) -> Vec<&Facilitator> {
        if self.config.facilitators.is_empty() {
            return self.registry.facilitators_for_chain(self.config.chain);
        }
        self.config
            .facilitators
            .iter()
            .filter_map(|id| self.registry.get(id))
            .collect()
    }

    async fn sync_address(
        &self,
        facilitator: &Facilitator,
        address: &FacilitatorAddressConfig,
        now: DateTime<Utc>,
    ) -> Result<AddressOutcome, SyncError> {
        let job = &self.config;

        let since = resolve_since_async(
            &self.db,
            job.chain,
            &address.address,
            job.provider,
            address.sync_start_date,
        )
        .await?;
        info!(%since, %now, "resolved watermark");

        let ctx = FetchContext {
            chain: job.chain,
            facilitator_id: &facilitator.id,
            address,
        };
        let mut sink = PersistingSink {
            db: self.db.clone(),
            fetched: 0,
            saved: 0,
        };

        let driven = pagination::drive(
            job.adapter,
            job.pagination,
            self.transport.as_ref(),
            ctx,
            since,
            now,
            &mut sink,
        )
        .await;

        // Pages already handed to the sink are stored even when a later page fails.
        let driven = match driven {
            Ok(driven) => driven,
            Err(e) => {
                if sink.saved > 0 {
                    info!(saved = sink.saved, "kept rows stored before the failure");
                }
                return Err(e);
            }
        };

        let outcome = AddressOutcome {
            facilitator_id: facilitator.id.clone(),
            address: address.address.clone(),
            since,
            fetched: sink.fetched,
            saved: sink.saved,
            requests: driven.requests,
        };

        info!(
            fetched = outcome.fetched,
            saved = outcome.saved,
            duplicates = outcome.duplicates(),
            requests = outcome.requests,
            "address synced"
        );

        Ok(outcome)
    }
}
