//! In-process publish/subscribe bus decoupling hardware producers from
//! behavior consumers.

pub mod bus;

pub use bus::{EventBus, SubscriberId};
