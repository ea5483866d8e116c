//! Inventory reservation engine.
//!
//! Stock is held in two counters per product: total `quantity` and
//! `reserved_quantity`. A reservation is a soft hold; committing it turns
//! the hold into a permanent deduction, releasing it returns the stock to
//! the available pool. All write paths are transactional batches: either
//! every item in a batch moves, or none do.

pub mod level;
pub mod listener;
pub mod store;

pub use level::{StockError, StockLevel};
pub use listener::{InventoryListener, ListenerError};
pub use store::{InMemoryInventoryStore, InventoryError, InventoryLevel, InventoryStore, PgInventoryStore};
