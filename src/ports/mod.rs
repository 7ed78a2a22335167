//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Broker Ports
//!
//! - `EventPublisher` - Put an envelope on the broker
//! - `EventSubscriber` - Receive envelopes from every instance
//! - `EventHandler` - Handler invoked for each received envelope
//!
//! ## Budget Ports
//!
//! - `UsageLedger` - Increment-by-key and aggregate-by-range usage rows
//! - `BudgetSettingsRepository` - Tenant budget settings
//!
//! ## Transport Ports
//!
//! - `ConnectionSink` - Deliver an envelope to one local connection

mod budget_settings;
mod connection_sink;
mod event_publisher;
mod event_subscriber;
mod usage_ledger;

pub use budget_settings::BudgetSettingsRepository;
pub use connection_sink::{ConnectionSink, SinkError};
pub use event_publisher::{BrokerError, EventPublisher};
pub use event_subscriber::{EventHandler, EventSubscriber};
pub use usage_ledger::{LedgerError, UsageLedger};
