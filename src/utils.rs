//! # Utility Functions for the Bazaar Trading Simulation
//!
//! Common error, time and logging plumbing used throughout the system.

use crate::types::EntityId;
use uuid::Uuid;

/// Generate a unique offer request ID
pub fn generate_request_id() -> Uuid {
    Uuid::new_v4()
}

/// Time utilities
pub mod time {
    use chrono::Utc;

    /// Current epoch time in milliseconds. Strictly positive, so the
    /// 0 value stays reserved as the "immediate offer" sentinel.
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Error handling utilities
pub mod error {
    /// Standard error types for the system
    #[derive(Debug, thiserror::Error)]
    pub enum SystemError {
        #[error("Validation error: {0}")]
        Validation(String),

        #[error("Trading error: {0}")]
        Trading(String),

        #[error("Registration error: {0}")]
        Registration(String),

        #[error("Fabric error: {0}")]
        Fabric(String),

        #[error("Production error: {0}")]
        Production(String),

        #[error("Timed out: {0}")]
        Timeout(String),

        #[error("Configuration error: {0}")]
        Configuration(String),

        #[error("Internal error: {0}")]
        Internal(String),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }

    /// Result type alias for system operations
    pub type SystemResult<T> = Result<T, SystemError>;
}

/// Logging utilities
pub mod logging {
    use log::{error, info, warn};

    /// Initialize logging with proper formatting
    pub fn init_logging() {
        env_logger::Builder::from_default_env()
            .format_timestamp_millis()
            .init();
    }

    /// Log system startup
    pub fn log_startup(component: &str) {
        info!("🚀 Starting {}", component);
    }

    /// Log system shutdown
    pub fn log_shutdown(component: &str) {
        info!("🛑 Stopping {}", component);
    }

    /// Log error with context
    pub fn log_error(component: &str, error: &dyn std::error::Error) {
        error!("[{}] Error: {}", component, error);
    }

    /// Log warning with context
    pub fn log_warning(component: &str, message: &str) {
        warn!("[{}] {}", component, message);
    }
}

/// Testing utilities
pub mod testing {
    use super::*;
    use crate::types::{Commodity, InventoryItem, OfferRequest, TraderInventory};

    /// Create a test commodity listing
    pub fn create_test_commodity(name: &str) -> Commodity {
        Commodity::new(name, 1.0, 3010)
    }

    /// Create a trader inventory pre-loaded with the given items
    pub fn create_test_inventory(cash: f64, items: &[(&str, f64, i64)]) -> TraderInventory {
        let mut inventory = TraderInventory::new(500.0, cash);
        for (name, unit_size, quantity) in items {
            inventory.items.insert(
                name.to_string(),
                InventoryItem {
                    unit_size: *unit_size,
                    quantity: *quantity,
                },
            );
        }
        inventory
    }

    /// Create a plain offer request for tests
    pub fn create_test_offer(
        sender_id: EntityId,
        commodity: &str,
        quantity: i64,
        unit_price: f64,
        expiry_ms: i64,
    ) -> OfferRequest {
        OfferRequest {
            request_id: generate_request_id(),
            sender_id,
            commodity: commodity.to_string(),
            quantity,
            unit_price,
            expiry_ms,
        }
    }
}

// Re-export commonly used items
pub use error::{SystemError, SystemResult};
pub use time::now_ms;
