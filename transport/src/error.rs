use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The default port was taken and none of the bounded random retries
    /// found a free one either. Fatal to `Server::run`.
    #[error("exhausted port retries: no free TCP port found")]
    PortExhaustion,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Discovery(#[from] discovery::DiscoveryError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
