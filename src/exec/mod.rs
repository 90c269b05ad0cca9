//! Execution control
//!
//! Orchestrates preloading, staging and the fork into the jail, with
//! type-state enforcement of the order.

pub mod caller;
pub mod child;

pub use caller::ChrootCaller;
pub use child::{ChildHandle, ChildOutcome};
