//! Cluster membership and replication.
//!
//! Peers are the other ordinals of the same StatefulSet, addressed through
//! the headless service DNS pattern. Leadership is a stateless routing
//! hint: the lowest reachable ordinal wins each decision independently.

mod cluster;

pub use cluster::{Cluster, ProxiedResponse, Service, INTERNAL_REPLICATION_HEADER};
