//! Command dispatch table and per-packet pipeline.
//!
//! The command table is built once at startup via [`DispatcherBuilder`] and
//! frozen into an `Arc` before serving traffic — no locks on the read path,
//! matching the "configuration store" guidance in the concurrency model.
//!
//! Connection-level decrypt/decompress already ran inside
//! [`packetflow_core::Connection::receive`] by the time a packet reaches
//! [`Dispatcher::dispatch`]; the header's `flags` survive that step
//! untouched (decryption replaces the payload, not the header), so the
//! encrypted-flag and permission checks below still see what the sender
//! declared. The cost is a wasted decrypt on a packet that a permission or
//! rate check would have rejected anyway — never a correctness issue, since
//! nothing about a rejected packet reaches the peer either way.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use packetflow_core::{Connection, Environment, PermissionLevel};
use packetflow_proto::{Packet, PacketFlags};

use crate::admission::{RateDecision, RateLimitGuard, ABUSE_STRIKE_THRESHOLD};
use crate::config::{DispatcherConfig, RateClass};
use crate::error::{DispatchError, HandlerError};

/// A registered handler. Boxed to erase the concrete async function type;
/// `for<'c>` lets the returned future borrow the packet and the `&mut
/// Connection` argument without tying the table to one caller's lifetime.
/// An `Ok(Some(packet))` reply is queued onto the connection's outbox by
/// the dispatcher; the handler itself never touches the socket.
pub type HandlerFn<E> = Arc<
    dyn for<'c> Fn(
            &'c Packet,
            &'c mut Connection<E>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Packet>, HandlerError>> + Send + 'c>>
        + Send
        + Sync,
>;

/// Per-metrics callback invoked after a handler completes.
pub type MetricsCallback = Arc<dyn Fn(&str, std::time::Duration) + Send + Sync>;

/// Unifies pipeline-level and handler-level failures for the single
/// `error_callback` hook, mirroring spec's single `error_handler(err,
/// command_id)` signature even though the two error types come from
/// different layers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchFailure {
    /// Failed before the handler ran (permission, rate limit, timeout...).
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// The handler itself returned an error.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Per-handler-error callback; if absent, errors are logged via `tracing`.
pub type ErrorCallback = Arc<dyn Fn(&DispatchFailure, u16) + Send + Sync>;

/// Registration record for one command id.
pub struct HandlerDescriptor<E: Environment> {
    name: &'static str,
    handler: HandlerFn<E>,
    required_permission: PermissionLevel,
    encrypted_required: bool,
    rate_class: RateClass,
}

/// Builds a frozen [`Dispatcher`]. Registration after [`DispatcherBuilder::build`]
/// is not possible by construction.
pub struct DispatcherBuilder<E: Environment> {
    handlers: HashMap<u16, HandlerDescriptor<E>>,
    config: DispatcherConfig,
    metrics_callback: Option<MetricsCallback>,
    error_callback: Option<ErrorCallback>,
}

impl<E: Environment> DispatcherBuilder<E> {
    /// Start a builder with the given dispatcher-wide defaults.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        Self { handlers: HashMap::new(), config, metrics_callback: None, error_callback: None }
    }

    /// Register a handler for `command`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateHandler`] if `command` is already
    /// registered.
    pub fn register<F, Fut>(
        mut self,
        command: u16,
        name: &'static str,
        required_permission: PermissionLevel,
        encrypted_required: bool,
        rate_class: RateClass,
        handler: F,
    ) -> Result<Self, DispatchError>
    where
        F: for<'c> Fn(&'c Packet, &'c mut Connection<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Packet>, HandlerError>> + Send,
    {
        if self.handlers.contains_key(&command) {
            return Err(DispatchError::DuplicateHandler { command });
        }
        let handler: HandlerFn<E> = Arc::new(move |packet, conn| Box::pin(handler(packet, conn)));
        self.handlers.insert(
            command,
            HandlerDescriptor { name, handler, required_permission, encrypted_required, rate_class },
        );
        Ok(self)
    }

    /// Install a callback invoked with `(handler_name, elapsed)` after every
    /// successful handler invocation.
    #[must_use]
    pub fn with_metrics_callback(mut self, callback: MetricsCallback) -> Self {
        self.metrics_callback = Some(callback);
        self
    }

    /// Install a callback invoked with `(error, command)` on any dispatch
    /// failure, whether it came from the pipeline (permission, rate limit,
    /// timeout) or from the handler itself.
    #[must_use]
    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }

    /// Freeze the table. The dispatcher starts with a default-configured
    /// rate limiter; callers that want it to share the listener's
    /// [`crate::admission::AdmissionConfig`] should follow up with
    /// [`Dispatcher::with_rate_limiter`].
    #[must_use]
    pub fn build(self) -> Dispatcher<E> {
        Dispatcher {
            handlers: Arc::new(self.handlers),
            config: self.config,
            rate_limiter: Arc::new(RateLimitGuard::new(&crate::config::AdmissionConfig::default())),
            metrics_callback: self.metrics_callback,
            error_callback: self.error_callback,
        }
    }
}

/// Outcome of routing one packet through the dispatcher.
pub enum DispatchOutcome {
    /// The handler ran to completion.
    Handled,
    /// No handler ran; `reason` should be reported to the peer as an
    /// error-response packet (type=String, command=Error) unless the
    /// error is [`DispatchError::UnknownCommand`], which is dropped
    /// silently per the error-handling design.
    Rejected {
        /// Why dispatch did not proceed.
        reason: DispatchError,
    },
    /// Three rate-limit strikes landed within the strike window; the
    /// caller should disconnect this connection with reason `abuse`.
    RecommendDisconnect,
}

/// Immutable, `Arc`-shared command table plus the rate limiter it
/// consults. Cheap to clone; intended to be shared across every connection
/// task.
#[derive(Clone)]
pub struct Dispatcher<E: Environment> {
    handlers: Arc<HashMap<u16, HandlerDescriptor<E>>>,
    config: DispatcherConfig,
    rate_limiter: Arc<RateLimitGuard>,
    metrics_callback: Option<MetricsCallback>,
    error_callback: Option<ErrorCallback>,
}

impl<E: Environment> Dispatcher<E> {
    /// Build with an externally owned rate limiter, e.g. one shared with
    /// the listener's admission guard instance.
    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimitGuard>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Route `packet` to its handler, applying the admission and
    /// permission checks first.
    pub async fn dispatch(
        &self,
        packet: Packet,
        connection_id: u64,
        connection: &mut Connection<E>,
        now: Instant,
    ) -> DispatchOutcome {
        let command = packet.header().command();

        let Some(descriptor) = self.handlers.get(&command) else {
            return DispatchOutcome::Rejected { reason: DispatchError::UnknownCommand { command } };
        };

        let is_encrypted = packet.header().flags().contains(PacketFlags::ENCRYPTED);
        if is_encrypted != descriptor.encrypted_required {
            return DispatchOutcome::Rejected {
                reason: DispatchError::PermissionDenied { command },
            };
        }

        match self.rate_limiter.check(connection_id, command, descriptor.rate_class, now) {
            RateDecision::Allow => {},
            RateDecision::Reject { strikes } => {
                if strikes >= ABUSE_STRIKE_THRESHOLD {
                    return DispatchOutcome::RecommendDisconnect;
                }
                return DispatchOutcome::Rejected { reason: DispatchError::RateLimited { command } };
            },
        }

        if connection.permission_level() < descriptor.required_permission {
            return DispatchOutcome::Rejected {
                reason: DispatchError::PermissionDenied { command },
            };
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.handler_timeout(),
            (descriptor.handler)(&packet, connection),
        )
        .await;

        match outcome {
            Ok(Ok(reply)) => {
                if let Some(callback) = &self.metrics_callback {
                    callback(descriptor.name, started.elapsed());
                }
                if let Some(reply) = reply {
                    if let Err(err) = connection.queue_send(reply) {
                        tracing::warn!(command, handler = descriptor.name, %err, "failed to queue handler reply");
                    }
                }
                DispatchOutcome::Handled
            },
            Ok(Err(handler_error)) => {
                let is_fatal = handler_error.is_fatal();
                if let Some(callback) = &self.error_callback {
                    callback(&DispatchFailure::Handler(handler_error), command);
                } else {
                    tracing::warn!(command, handler = descriptor.name, %handler_error, "handler returned an error");
                }
                if is_fatal {
                    DispatchOutcome::RecommendDisconnect
                } else {
                    DispatchOutcome::Handled
                }
            },
            Err(_) => {
                let error = DispatchError::HandlerTimeout { command };
                if let Some(callback) = &self.error_callback {
                    callback(&DispatchFailure::Dispatch(error.clone()), command);
                } else {
                    tracing::warn!(command, handler = descriptor.name, "handler timed out");
                }
                DispatchOutcome::Rejected { reason: error }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use packetflow_core::{ConnectionConfig, SystemEnvironment};
    use packetflow_crypto::{CompressionMode, EncMode};
    use packetflow_proto::PacketType;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_connection() -> Connection<SystemEnvironment> {
        Connection::new(
            "127.0.0.1:1".to_string(),
            EncMode::ChaCha20Poly1305,
            CompressionMode::GZip,
            SystemEnvironment,
            ConnectionConfig::default(),
        )
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let dispatcher = DispatcherBuilder::<SystemEnvironment>::new(DispatcherConfig::default()).build();
        let mut conn = test_connection();
        let packet = Packet::new(1, 0xFFFF, PacketType::Binary, Bytes::new()).unwrap();
        let outcome = dispatcher.dispatch(packet, 1, &mut conn, Instant::now()).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected { reason: DispatchError::UnknownCommand { .. } }
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let result = DispatcherBuilder::<SystemEnvironment>::new(DispatcherConfig::default())
            .register(1, "echo", PermissionLevel::Guest, false, RateClass::Unlimited, |_, _| async { Ok(None) })
            .unwrap()
            .register(1, "echo2", PermissionLevel::Guest, false, RateClass::Unlimited, |_, _| async { Ok(None) });
        assert!(matches!(result, Err(DispatchError::DuplicateHandler { command: 1 })));
    }

    #[tokio::test]
    async fn handler_runs_when_permission_and_encryption_match() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let dispatcher = DispatcherBuilder::<SystemEnvironment>::new(DispatcherConfig::default())
            .register(1, "echo", PermissionLevel::Guest, false, RateClass::Unlimited, move |_packet, _conn| {
                let ran = Arc::clone(&ran_clone);
                async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(None)
                }
            })
            .unwrap()
            .build();

        let mut conn = test_connection();
        let packet = Packet::new(1, 1, PacketType::Binary, Bytes::new()).unwrap();
        let outcome = dispatcher.dispatch(packet, 1, &mut conn, Instant::now()).await;
        assert!(matches!(outcome, DispatchOutcome::Handled));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn insufficient_permission_is_rejected() {
        let dispatcher = DispatcherBuilder::<SystemEnvironment>::new(DispatcherConfig::default())
            .register(1, "admin_only", PermissionLevel::Admin, false, RateClass::Unlimited, |_, _| async { Ok(None) })
            .unwrap()
            .build();
        let mut conn = test_connection();
        let packet = Packet::new(1, 1, PacketType::Binary, Bytes::new()).unwrap();
        let outcome = dispatcher.dispatch(packet, 1, &mut conn, Instant::now()).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected { reason: DispatchError::PermissionDenied { .. } }
        ));
    }

    #[tokio::test]
    async fn encrypted_flag_mismatch_is_rejected() {
        let dispatcher = DispatcherBuilder::<SystemEnvironment>::new(DispatcherConfig::default())
            .register(1, "needs_encryption", PermissionLevel::Guest, true, RateClass::Unlimited, |_, _| async { Ok(None) })
            .unwrap()
            .build();
        let mut conn = test_connection();
        let packet = Packet::new(1, 1, PacketType::Binary, Bytes::new()).unwrap();
        let outcome = dispatcher.dispatch(packet, 1, &mut conn, Instant::now()).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Rejected { reason: DispatchError::PermissionDenied { .. } }
        ));
    }

    #[tokio::test]
    async fn rate_limit_recommends_disconnect_after_three_strikes() {
        let dispatcher = DispatcherBuilder::<SystemEnvironment>::new(DispatcherConfig::default())
            .register(2, "limited", PermissionLevel::Guest, false, RateClass::Low, |_, _| async { Ok(None) })
            .unwrap()
            .build();
        let mut conn = test_connection();
        let now = Instant::now();

        for _ in 0..10 {
            let packet = Packet::new(1, 2, PacketType::Binary, Bytes::new()).unwrap();
            dispatcher.dispatch(packet, 42, &mut conn, now).await;
        }

        let mut last_outcome = None;
        for _ in 0..3 {
            let packet = Packet::new(1, 2, PacketType::Binary, Bytes::new()).unwrap();
            last_outcome = Some(dispatcher.dispatch(packet, 42, &mut conn, now).await);
        }
        assert!(matches!(last_outcome, Some(DispatchOutcome::RecommendDisconnect)));
    }
}
