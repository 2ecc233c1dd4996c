//! Resilience patterns
//!
//! - Stale data guard with historical fallback
//! - Kill switch for graceful shutdown
//! - Panic hook that logs before the process dies

pub mod kill_switch;
pub mod panic;
pub mod stale_data;

pub use kill_switch::{KillSwitch, KillSwitchState};
pub use panic::install_panic_handler;
pub use stale_data::{is_stale, DataGuard, PriceSource};
