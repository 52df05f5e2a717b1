//! Shell-script providers for unit tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Answers the handshake, then either lists one `hello` tool or answers a
/// `tools/call` with a fixed greeting.
pub const HELLO_PROVIDER: &str = r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
read -r line
case "$line" in
  *tools/list*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"hello","description":"Say hello"}]}}' ;;
  *tools/call*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"Hello, World!"}]}}' ;;
esac
"#;

/// Lists `add`, `multiply` and `divide`; every call fails with divide by zero.
pub const CALCULATOR_PROVIDER: &str = r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
read -r line
case "$line" in
  *tools/list*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"add"},{"name":"multiply"},{"name":"divide"}]}}' ;;
  *tools/call*) printf '%s\n' '{"jsonrpc":"2.0","id":2,"error":{"code":-1,"message":"cannot divide by zero"}}' ;;
esac
"#;

/// Write an executable `/bin/sh` script into `dir`.
pub fn write_provider(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write a regular file without any execute bit.
pub fn write_plain_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, "not a provider\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    path
}

pub fn pid_is_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
