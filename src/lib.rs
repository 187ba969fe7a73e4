//! Bridge between cultivation plans and an external crop-allocation optimizer
//!
//! Plans are serialized into the engine's exchange documents, the engine is
//! invoked through a validated gateway, and its answer is reconciled back
//! into the stored plan in a single commit.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod reconcile;
pub mod snapshot;
pub mod store;
