// Application layer - use cases and orchestration.
// Storage is reached only through the ports in `crate::storage`.

pub mod balance;
pub mod error;
pub mod locks;
pub mod query;
pub mod recorder;
pub mod requests;
pub mod service;
pub mod transfer;

pub use error::*;
pub use query::TransactionPage;
pub use requests::*;
pub use service::{BalanceInfo, LedgerService, MovementResult};
pub use transfer::TransferResult;
