//! TCP application server framework: packet framing, connection state
//! machine, dispatcher, admission control, and buffer pooling.
//!
//! `packetflow-core` owns the Sans-IO connection state machine;
//! `packetflow-proto` owns the wire codec; `packetflow-crypto` owns the
//! compression/encryption pipeline; `packetflow-pool` owns buffer reuse.
//! This crate is the "glue": a real `tokio::net::TcpListener` accept loop,
//! the command dispatch table, and the admission/rate-limit guards that sit
//! in front of it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod admission;
mod config;
mod dispatcher;
mod error;
mod listener;

pub use admission::{
    AdmissionDecision, ConnectionLimitGuard, ConnectionLimitInfo, RateDecision, RateLimitGuard,
    ABUSE_STRIKE_THRESHOLD,
};
pub use config::{AdmissionConfig, DispatcherConfig, ListenerConfig, RateClass, ServerConfig};
pub use dispatcher::{
    Dispatcher, DispatcherBuilder, DispatchFailure, DispatchOutcome, ErrorCallback, HandlerDescriptor,
    HandlerFn, MetricsCallback,
};
pub use error::{DispatchError, HandlerError, ServerError};
pub use listener::Listener;
