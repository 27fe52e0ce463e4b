//! Reading pipeline
//!
//! - [`Dispatcher`]: validate, store, evaluate, correct and emit one reading
//! - [`CollectionLoop`]: poll reading sources and feed the dispatcher

mod collection;
mod dispatcher;

pub use collection::{
    CollectionConfig, CollectionLoop, CollectionLoopBuilder, CollectionResults, ReadingSource,
};
pub use dispatcher::{Dispatcher, DispatcherBuilder, IngestOutcome};
