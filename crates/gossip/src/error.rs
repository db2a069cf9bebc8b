#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A sync-type or historical-sync transition was not served within the
    /// transition timeout (the syncer was busy or not yet synced).
    #[error("sync transition timed out")]
    SyncTransitionTimeout,
    /// The syncer is shutting down; no further requests are served.
    #[error("gossip syncer exiting")]
    SyncerExiting,
    #[error("unexpected {kind} message: {context}")]
    Protocol { kind: &'static str, context: String },
    #[error("graph store failure: {0}")]
    Graph(String),
    #[error("unable to deliver message to peer: {0}")]
    Remote(String),
}
