//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the process-wide subscriber. Everything in this workspace logs
//! through `tracing` with structured fields, so filtering works on fields as well as levels:
//!
//! ```bash
//! # Lifecycle only: master start/stop, role switches
//! RUST_LOG=info cargo run
//!
//! # Every request with its correlation id and decoded payload
//! RUST_LOG=debug cargo run
//!
//! # Only the wire plumbing
//! RUST_LOG=ask_framework=debug cargo run
//! ```
//!
//! A proxied read at `debug` looks like:
//!
//! ```text
//! DEBUG read{tx=6f1c… store=config path=/interfaces}: Request sent correlation_id=3
//! DEBUG Request correlation_id=3 request=Read { id: 6f1c…, store: Config, path: /interfaces }
//! DEBUG Read resource="router-1" tx=6f1c… found=true
//! ```

/// Initializes the tracing subscriber, filtered by `RUST_LOG`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
