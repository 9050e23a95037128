use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use event_vault::admin::AdminService;
use event_vault::config::Config;
use event_vault::crypto::{FieldEncryptor, KeyManagementRepository, PostgresKeyRepository};
use event_vault::domain::envelope::{
    Envelope, EnvelopeCommand, EnvelopeCommandHandler, EnvelopeRequest, TransferFunds, TransferHandler,
};
use event_vault::domain::user::{SignUp, SignUpHandler, User};
use event_vault::event_sourcing::{
    EventMetadata, EventSourcedRepository, EventStore, MemoryStorage, PostgresEventStore, UnitOfWorkMiddleware,
};
use event_vault::metrics::Metrics;
use event_vault::utils::{retry_on_transient, RetryConfig, RetryResult};
use event_vault::EventSourcingError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,event_vault=debug"))
        )
        .init();

    tracing::info!("🚀 Starting event vault demo");

    let config = Config::from_env()?;
    tracing::debug!(?config, "Configuration loaded");

    // === 1. Keys, event map, metrics ===
    tracing::info!("Deriving master key");
    let master = Arc::new(config.master_key()?);
    let event_map = Arc::new(config.event_map()?);
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Storage backend ===
    let (store, keys): (Arc<dyn EventStore>, Arc<dyn KeyManagementRepository>) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to Postgres...");
            let postgres = PostgresEventStore::connect(url, config.db_max_connections).await?;
            postgres.migrate().await?;
            let keys = PostgresKeyRepository::new(postgres.pool().clone(), master.clone());
            (Arc::new(postgres), Arc::new(keys))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            let storage = MemoryStorage::new();
            (
                Arc::new(storage.event_store()),
                Arc::new(storage.key_repository(master.clone())),
            )
        }
    };

    let encryptor = Arc::new(FieldEncryptor::new(keys.clone(), master));
    let middleware = UnitOfWorkMiddleware::new(store.clone(), encryptor.clone(), event_map.clone(), metrics.clone());
    let users = EventSourcedRepository::<User>::new(store.clone(), encryptor.clone(), event_map.clone());
    let envelopes = EventSourcedRepository::<Envelope>::new(store.clone(), encryptor.clone(), event_map.clone());

    // === 3. Sign up a user (mints their key in the same commit) ===
    let user_id = Uuid::new_v4();
    middleware
        .dispatch(
            &SignUpHandler::new(users.clone()),
            SignUp {
                user_id,
                email: "ada@example.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                locale: "en-GB".to_string(),
            },
            EventMetadata::for_request(),
        )
        .await?;
    tracing::info!("✅ User signed up: {}", user_id);

    // === 4. Two envelopes ===
    let groceries = Uuid::new_v4();
    let savings = Uuid::new_v4();
    let envelope_handler = EnvelopeCommandHandler::new(envelopes.clone());

    for (envelope_id, name) in [(groceries, "Groceries"), (savings, "Savings")] {
        let request = EnvelopeRequest {
            envelope_id,
            owner_id: user_id,
            command: EnvelopeCommand::Create { name: name.to_string() },
        };
        middleware.dispatch(&envelope_handler, request, EventMetadata::for_request()).await?;
    }

    let request = EnvelopeRequest {
        envelope_id: groceries,
        owner_id: user_id,
        command: EnvelopeCommand::Credit { amount: 50_000 },
    };
    middleware.dispatch(&envelope_handler, request, EventMetadata::for_request()).await?;
    tracing::info!("✅ Envelopes created and funded");

    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    let before_transfer = Utc::now();
    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;

    // === 5. Transfer: two aggregates, one commit, retried on conflict ===
    let transfer = TransferHandler::new(envelopes.clone());
    let (middleware_ref, transfer_ref) = (&middleware, &transfer);
    let result = retry_on_transient(RetryConfig::for_conflicts(), move |attempt| {
        let metadata = EventMetadata::for_request().with_attribute("attempt", attempt.to_string());
        let command = TransferFunds {
            from: groceries,
            to: savings,
            amount: 12_500,
        };
        middleware_ref.dispatch(transfer_ref, command, metadata)
    })
    .await;

    match result {
        RetryResult::Success(()) => tracing::info!("✅ Transferred 12500 from groceries to savings"),
        RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => return Err(e.into()),
    }

    // === 6. Rewind and replay ===
    let envelope_admin = AdminService::new(envelopes.clone(), keys.clone(), metrics.clone());
    let rewound = envelope_admin.rewind(groceries, before_transfer).await?;
    let current = envelope_admin.replay(groceries, None).await?;
    tracing::info!(
        before = rewound.state.balance,
        after = current.state.balance,
        "⏪ Groceries balance before and after the transfer"
    );

    // === 7. Erase the user ===
    let user_admin = AdminService::new(users.clone(), keys.clone(), metrics.clone());
    user_admin.erase_user(user_id).await?;

    match users.get(user_id, None).await {
        Err(EventSourcingError::KeyNotFound(_)) => {
            tracing::info!("🔒 Personal data of {} is no longer readable", user_id)
        }
        Ok(_) => tracing::error!("User {} still readable after erasure", user_id),
        Err(e) => return Err(e.into()),
    }

    // Envelopes carry no personal data and still replay.
    let savings_now = envelopes.get(savings, None).await?;
    tracing::info!("💰 Savings balance after erasure: {}", savings_now.state().balance);

    tracing::debug!("📊 Metrics:\n{}", metrics.gather_text()?);
    tracing::info!("🎉 Demo complete!");

    Ok(())
}
