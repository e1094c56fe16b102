//! Welcome-email side effect of user registration.
//!
//! `UserRegistered` events become `SendWelcomeEmail` commands on the
//! `notifications` queue; `NotificationHandler::flush` drains the queue and
//! sends through `EmailService`, which guards the client with a circuit
//! breaker.
//!
//! Registrations published inside [`with_inline_welcome`] are skipped: the
//! caller sends (or withholds) the welcome itself.

use std::future::Future;
use std::sync::{Arc, Weak};

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, info, warn};

use stratum_events::context;
use stratum_events::{BusError, Command, MessageBus};
use stratum_identity::USER_REGISTERED;

use crate::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::saga::WelcomeNotifier;

pub const EMAIL_SERVICE_BREAKER: &str = "EmailService";
pub const NOTIFICATIONS_QUEUE: &str = "notifications";
pub const SEND_WELCOME_EMAIL: &str = "SendWelcomeEmail";

const WELCOME_SUBJECT: &str = "Welcome!";
const WELCOME_BODY: &str = "Thanks for signing up.";

tokio::task_local! {
    static INLINE_WELCOME: ();
}

/// Run `fut` with welcome delivery owned by the caller. Registrations it
/// publishes are not queued on `notifications`.
pub async fn with_inline_welcome<F: Future>(fut: F) -> F::Output {
    INLINE_WELCOME.scope((), fut).await
}

fn welcome_sent_inline() -> bool {
    INLINE_WELCOME.try_with(|_| ()).is_ok()
}

/// Outbound mail transport.
#[async_trait]
pub trait EmailClient: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Transport that only logs. Used when no real client is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEmailClient;

#[async_trait]
impl EmailClient for LoggingEmailClient {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        info!(to, subject, "email sent");
        Ok(())
    }
}

pub struct EmailService {
    client: Arc<dyn EmailClient>,
    breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for EmailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailService")
            .field("breaker", &self.breaker.name())
            .finish_non_exhaustive()
    }
}

impl EmailService {
    pub fn new(client: Arc<dyn EmailClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn send_welcome_email(&self, to: &str) -> Result<(), BreakerError<anyhow::Error>> {
        self.breaker
            .execute(|| self.client.send(to, WELCOME_SUBJECT, WELCOME_BODY))
            .await
    }
}

#[async_trait]
impl WelcomeNotifier for EmailService {
    async fn send_welcome_email(&self, to: &str) -> anyhow::Result<()> {
        EmailService::send_welcome_email(self, to)
            .await
            .map_err(|err| match err {
                BreakerError::Inner(source) => source,
                open @ BreakerError::Open { .. } => anyhow!(open.to_string()),
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct NotificationHandler {
    bus: Arc<MessageBus>,
    email: Arc<EmailService>,
}

impl NotificationHandler {
    pub fn new(bus: Arc<MessageBus>, email: Arc<EmailService>) -> Self {
        Self { bus, email }
    }

    /// Queue a welcome email for every registration published on the bus.
    pub fn subscribe(&self) {
        let bus: Weak<MessageBus> = Arc::downgrade(&self.bus);
        self.bus.subscribe(USER_REGISTERED, move |event| {
            let Some(email) = event.data_str("email") else {
                warn!(aggregate_id = %event.aggregate_id(), "registration without email; no welcome sent");
                return Ok(());
            };
            if welcome_sent_inline() {
                debug!(aggregate_id = %event.aggregate_id(), "welcome owned by caller; not queued");
                return Ok(());
            }
            let Some(bus) = bus.upgrade() else {
                return Ok(());
            };
            let mut data = Map::new();
            data.insert("email".into(), JsonValue::String(email.to_string()));
            bus.send(NOTIFICATIONS_QUEUE, Command::new(SEND_WELCOME_EMAIL, data));
            Ok(())
        });
    }

    pub fn pending(&self) -> usize {
        self.bus.queue_len(NOTIFICATIONS_QUEUE)
    }

    /// Send every queued welcome email.
    ///
    /// Delivery failures are logged and counted; they never fail the flush.
    pub async fn flush(&self) -> Result<FlushReport, BusError> {
        let mut pending = Vec::new();
        self.bus.process_queue(NOTIFICATIONS_QUEUE, |command| {
            if command.command_type() != SEND_WELCOME_EMAIL {
                warn!(command_type = command.command_type(), "unexpected notification command");
                return Ok(());
            }
            match command.data_str("email") {
                Some(email) => pending.push((email.to_string(), context::current())),
                None => warn!("welcome command without recipient"),
            }
            Ok(())
        })?;

        let mut report = FlushReport::default();
        for (to, ctx) in pending {
            let send = self.email.send_welcome_email(&to);
            let result = match ctx {
                Some(ctx) => context::with_context(ctx, send).await,
                None => send.await,
            };
            match result {
                Ok(()) => {
                    debug!(to = %to, "welcome email delivered");
                    report.sent += 1;
                }
                Err(err) => {
                    error!(to = %to, error = %err, "failed to send welcome email");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
