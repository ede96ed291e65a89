pub mod aggregator;
pub mod config;
pub mod flush;
pub mod loadgen;
pub mod server;
pub mod store;

pub use aggregator::{CounterAggregator, SharedAggregator};
pub use store::{CounterStore, SharedStore, StoreError};
