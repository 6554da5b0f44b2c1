mod ledger;
mod money;
mod transaction;
mod transfer;
mod user;

pub use ledger::*;
pub use money::*;
pub use transaction::*;
pub use transfer::*;
pub use user::*;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the precision the store keeps, so a freshly built record
/// compares equal to the same record read back.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
