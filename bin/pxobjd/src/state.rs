//! Process-wide state shared by all HTTP surfaces.

use pxobj_cluster::Cluster;
use pxobj_store::Store;

/// Singletons established at startup; handlers borrow them for the life
/// of the process and keep no request-scoped state.
pub struct AppState {
    pub store: Store,
    pub cluster: Cluster,
    /// Shared bearer token for admin and peer traffic.
    pub token: String,
}
