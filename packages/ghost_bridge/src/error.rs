use std::io;

/// Errors surfaced by the bridge outside of a single session.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Another process already holds the port
    #[error("port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl BridgeError {
    /// Classify a bind failure, singling out the port-in-use case.
    pub fn from_bind(port: u16, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AddrInUse {
            Self::PortInUse { port }
        } else {
            Self::Bind { port, source }
        }
    }

    pub fn is_port_in_use(&self) -> bool {
        matches!(self, Self::PortInUse { .. })
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_in_use_is_distinguished() {
        let err = BridgeError::from_bind(4001, io::Error::from(io::ErrorKind::AddrInUse));
        assert!(err.is_port_in_use());
        assert_eq!(err.to_string(), "port 4001 is already in use");
    }

    #[test]
    fn other_bind_failures_keep_their_cause() {
        let err = BridgeError::from_bind(80, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_port_in_use());
        assert!(matches!(err, BridgeError::Bind { port: 80, .. }));
    }
}
