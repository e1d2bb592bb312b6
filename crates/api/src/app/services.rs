//! Service wiring: picks storage and billing adapters from config and builds
//! the workflows the handlers call.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use submgr_core::{Clock, SystemClock};
use submgr_infra::billing::{HttpBillingClient, InMemoryBillingClient};
use submgr_infra::config::{AppConfig, BillingConfig, DatabaseConfig};
use submgr_infra::outbox::{InMemoryOutboxStore, OutboxStore, PostgresOutboxStore, RefundProcessor, RefundProcessorHandle};
use submgr_infra::repository::{InMemorySubscriptionRepository, PostgresSubscriptionRepository};
use submgr_infra::{
    BillingClient, CancelSubscription, CreateSubscription, Deadline, RefundMode, SubscriptionRepository,
};

pub type DynRepository = Arc<dyn SubscriptionRepository>;
pub type DynBilling = Arc<dyn BillingClient>;
pub type DynOutbox = Arc<dyn OutboxStore>;

/// Everything a request handler needs, shared behind an `Arc`.
pub struct AppServices {
    pub create: CreateSubscription<DynRepository, DynBilling>,
    pub cancel: CancelSubscription<DynRepository, DynBilling>,
    pub repository: DynRepository,
    pub billing: DynBilling,
    pub outbox: DynOutbox,
    pub clock: Arc<dyn Clock>,
    pub request_timeout: Duration,
    /// `memory` or `postgres`, reported by `/health`.
    pub storage: &'static str,
}

impl AppServices {
    /// Assemble services from already-built adapters.
    pub fn new(
        repository: DynRepository,
        billing: DynBilling,
        outbox: DynOutbox,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
        storage: &'static str,
    ) -> Self {
        Self {
            create: CreateSubscription::new(repository.clone(), billing.clone(), clock.clone()),
            cancel: CancelSubscription::new(
                repository.clone(),
                billing.clone(),
                clock.clone(),
                config.billing_cycle_days,
                config.refund_mode,
            ),
            repository,
            billing,
            outbox,
            clock,
            request_timeout: config.request_timeout,
            storage,
        }
    }

    /// Deadline for one inbound request.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<Arc<AppServices>> {
    let billing = build_billing(config.billing.as_ref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let services = match &config.database {
        Some(database) => {
            let (repository, outbox) = build_postgres(database).await?;
            AppServices::new(repository, billing, outbox, clock, config, "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set; subscriptions are kept in memory");
            let outbox = InMemoryOutboxStore::arc();
            let repository = Arc::new(InMemorySubscriptionRepository::with_outbox(outbox.clone()));
            AppServices::new(repository, billing, outbox, clock, config, "memory")
        }
    };

    Ok(Arc::new(services))
}

fn build_billing(config: Option<&BillingConfig>) -> anyhow::Result<DynBilling> {
    match config {
        Some(billing) => {
            let client = HttpBillingClient::new(&billing.base_url, billing.timeout)
                .context("failed to build billing client")?;
            tracing::info!(base_url = %client.base_url(), "using HTTP billing");
            Ok(Arc::new(client))
        }
        None => {
            tracing::warn!("BILLING_BASE_URL not set; in-memory billing accepts every customer");
            Ok(Arc::new(InMemoryBillingClient::accept_all()))
        }
    }
}

async fn build_postgres(config: &DatabaseConfig) -> anyhow::Result<(DynRepository, DynOutbox)> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .context("failed to connect to Postgres")?;

    let repository = PostgresSubscriptionRepository::new(pool.clone());
    repository.migrate().await.context("failed to run migrations")?;
    tracing::info!(max_connections = config.max_connections, "using Postgres storage");

    Ok((Arc::new(repository), Arc::new(PostgresOutboxStore::new(pool))))
}

/// Start the background refund processor when refunds go through the outbox.
pub fn spawn_refund_processor(config: &AppConfig, services: &AppServices) -> Option<RefundProcessorHandle> {
    if config.refund_mode != RefundMode::Outbox {
        return None;
    }

    let processor = RefundProcessor::new(
        services.outbox.clone(),
        services.billing.clone(),
        services.clock.clone(),
        config.refund_processor(),
    );
    Some(processor.spawn())
}
