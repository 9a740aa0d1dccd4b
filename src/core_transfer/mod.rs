pub mod counter;
pub mod state;
pub mod throttle;

pub use counter::{Counter, CounterResult, LoginGuard, TransferGuard, UserId};
pub use state::{TransferKind, TransferState};
pub use throttle::{Direction, SpeedCounter, SpeedInfo, SpeedLimit, SpeedThrottle};
