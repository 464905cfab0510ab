//! RooDB query processor
//!
//! A pull-based operator engine: plans are trees of [`executor::Operator`]s,
//! each producing a cursor that pulls rows from its inputs under a stream of
//! query bindings. Storage is reached only through [`storage::StoreAdapter`].

pub mod catalog;
pub mod executor;
pub mod storage;
