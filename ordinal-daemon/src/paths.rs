use std::path::{Path, PathBuf};

pub use ordinal_core::store::ordinal_root;

pub const DAEMON_SOCKET: &str = "ordinal.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    ordinal_root(home).join(DAEMON_SOCKET)
}
