//! Background tasks owned by a cache instance. Currently only the notifier,
//! which delivers removal events to the registered listener.

pub(crate) mod notifier;
