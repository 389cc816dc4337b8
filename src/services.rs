//! PUS services.
//!
//! This module contains the service handlers of the payload controller. They
//! implement [`ServiceHandler`](crate::dispatch::ServiceHandler) and are
//! registered in the [`Dispatcher`](crate::dispatch::Dispatcher).

pub mod housekeeping;
pub mod test;
