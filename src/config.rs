use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::error::{AviaryError, Result};

/// Validated server configuration, read-only once built.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// the TCP port the server listens on
    pub port: u16,
    /// directory holding the persisted birds and sightings files
    pub data_dir: PathBuf,
    /// number of worker threads executing commands
    pub workers: u32,
}

impl ServerConfig {
    /// Validates the raw command line values and builds a configuration.
    ///
    /// # Errors
    /// returns [`AviaryError::Config`] if the port, data directory or worker
    /// count is invalid; the server must not open a socket in that case
    ///
    /// [`AviaryError::Config`]: ./enum.AviaryError.html
    pub fn build(port: &str, data_dir: &str, workers: &str) -> Result<ServerConfig> {
        let port: u16 = port
            .parse()
            .map_err(|_| AviaryError::Config(format!("invalid port: {}", port)))?;
        if port == 0 {
            return Err(AviaryError::Config(
                "port must be between 1 and 65535".to_owned(),
            ));
        }
        let workers: u32 = workers
            .parse()
            .map_err(|_| AviaryError::Config(format!("invalid worker count: {}", workers)))?;
        if workers == 0 {
            return Err(AviaryError::Config(
                "worker count must be at least 1".to_owned(),
            ));
        }
        if data_dir.is_empty() {
            return Err(AviaryError::Config(
                "data directory must not be empty".to_owned(),
            ));
        }
        Ok(ServerConfig {
            port,
            data_dir: PathBuf::from(data_dir),
            workers,
        })
    }

    /// the local address the server binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_values_build_a_config() {
        let config = ServerConfig::build("4000", "serverdata", "4").unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.data_dir, PathBuf::from("serverdata"));
    }

    #[test]
    fn out_of_range_or_garbage_values_are_config_errors() {
        for (port, data, workers) in [
            ("notaport", "serverdata", "4"),
            ("0", "serverdata", "4"),
            ("70000", "serverdata", "4"),
            ("4000", "", "4"),
            ("4000", "serverdata", "0"),
            ("4000", "serverdata", "many"),
        ] {
            let err = ServerConfig::build(port, data, workers).unwrap_err();
            assert!(matches!(err, AviaryError::Config(_)), "{:?}", (port, data, workers));
        }
    }
}
