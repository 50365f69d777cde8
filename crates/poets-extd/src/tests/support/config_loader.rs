//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use poets_ext_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that provisions a Unix socket path under a temporary directory.
pub struct TestConfigLoader {
    socket_dir: TempDir,
    echo_devices: u32,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            socket_dir: TempDir::new().expect("failed to create temporary directory for socket"),
            echo_devices: 1,
        }
    }

    /// Overrides the size of the echo graph.
    #[must_use]
    pub fn with_echo_devices(mut self, echo_devices: u32) -> Self {
        self.echo_devices = echo_devices;
        self
    }

    fn socket_path(&self) -> String {
        let path = self.socket_dir.path().join("run").join("poets-extd.sock");
        path.to_str()
            .expect("temporary socket path was not valid UTF-8")
            .to_owned()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            listen: SocketEndpoint::unix(self.socket_path()),
            echo_devices: self.echo_devices,
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing an invalid listen endpoint.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("poets-extd"),
            OsString::from("--listen"),
            OsString::from("carrier-pigeon://loft"),
        ];
        Config::load_from_iter(args)
    }
}
