//! Business logic services

pub mod books;
pub mod borrowings;
pub mod notifications;
pub mod payments;
pub mod redis;
pub mod stripe;
pub mod telegram;
pub mod users;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    repository::Repository,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub users: users::UsersService,
    pub books: books::BooksService,
    pub borrowings: borrowings::BorrowingsService,
    pub payments: payments::PaymentsService,
    pub redis: redis::RedisService,
    repository: Repository,
}

impl Services {
    /// Create all services with the given repository and outbound adapters
    pub fn new(
        repository: Repository,
        config: &AppConfig,
        gateway: Arc<dyn stripe::PaymentGateway>,
        notifier: Arc<dyn telegram::Notifier>,
        redis_service: redis::RedisService,
    ) -> Self {
        let checkout = payments::Checkout::new(gateway, &config.stripe, &config.server.public_url);

        Self {
            users: users::UsersService::new(repository.clone(), config.auth.clone()),
            books: books::BooksService::new(repository.clone()),
            borrowings: borrowings::BorrowingsService::new(
                repository.clone(),
                checkout.clone(),
                notifications::NotificationService::new(notifier),
                config.billing.fine_multiplier,
            ),
            payments: payments::PaymentsService::new(repository.clone(), checkout, &config.stripe),
            redis: redis_service,
            repository,
        }
    }

    pub async fn ping_database(&self) -> AppResult<()> {
        self.repository.ping().await
    }

    /// Services wired to the real Stripe and Telegram APIs
    pub fn from_config(
        repository: Repository,
        config: &AppConfig,
        redis_service: redis::RedisService,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let gateway: Arc<dyn stripe::PaymentGateway> =
            Arc::new(stripe::StripeClient::new(http.clone(), &config.stripe));
        let notifier: Arc<dyn telegram::Notifier> =
            match telegram::TelegramClient::from_config(http, &config.telegram) {
                Some(client) => Arc::new(client),
                None => {
                    tracing::info!("Telegram notifications disabled");
                    Arc::new(telegram::DisabledNotifier)
                }
            };

        Ok(Self::new(repository, config, gateway, notifier, redis_service))
    }
}
