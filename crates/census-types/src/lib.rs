//! Image Census Types
//!
//! Data model shared by the cluster client and the Image Census controller:
//! cluster configuration, reconcile keys, per-cluster deployment records and
//! the serialized per-cluster snapshot.

pub mod cluster;
pub mod key;
pub mod record;
pub mod snapshot;

pub use cluster::*;
pub use key::*;
pub use record::*;
pub use snapshot::*;
