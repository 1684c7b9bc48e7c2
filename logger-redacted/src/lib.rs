//! Structured logging with rule-based masking of sensitive data
//!
//! Every record passes through a [`MaskingEngine`] before it is written, so
//! personal and financial identifiers never leave the process in clear text.
//! Records follow an ECS-like schema and carry the trace and span ids of the
//! ambient OpenTelemetry context.
//!
//! # Masked Data Types
//!
//! - **CPF / CNPJ**: 123.456.789-09 → 123.XXX.XXX-09
//! - **Emails**: joao@example.com → joa***@example.com
//! - **Cards**: 4111 1111 1111 1234 → 4111-XXXX-XXXX-1234
//! - **Credentials**: bearer/basic tokens, JWTs, password and secret fields
//! - **Phones, bank accounts, SSNs**, and IPv4 addresses when enabled
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use logger_redacted::{init_logging, LogSink, LoggerConfig, MaskingEngine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::default();
//!     let sink = Arc::new(LogSink::stdout(&config, Arc::new(MaskingEngine::default())));
//!     init_logging(sink, &config.filter_directive())?;
//!
//!     tracing::info!(customer = "maria@example.com", "Order placed for cpf 12345678909");
//!     // {"message":"Order placed for cpf 123.XXX.XXX-09","labels":{"customer":"mar***@example.com"},...}
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Rule sets can be loaded from JSON with [`MaskingEngine::from_json`]:
//!
//! ```json
//! [
//!   {"name": "order_id", "pattern": "ORD-\\d+", "replacement": "ORD-***", "compliance": ["SOX"]}
//! ]
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod formatters;
pub mod layer;
pub mod macros;
pub mod record;
pub mod redactor;
pub mod rules;
pub mod sink;

pub use config::*;
pub use correlation::*;
pub use error::*;
pub use layer::*;
pub use macros::{short_type_name, short_type_name_of};
pub use record::*;
pub use redactor::*;
pub use sink::*;

#[doc(hidden)]
pub use tracing;
