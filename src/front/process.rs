//! Back subprocess lifecycle.
//!
//! The front spawns its own executable with the `backend` argument as a
//! child process, wiring stdout/stderr through. The child outlives the
//! handle; the front never kills it. The shutdown protocol asks it to exit
//! over RPC instead.

use std::io;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

/// Spawn the back process. `reload` propagates module-specific recovery
/// behaviour to the new back.
pub fn spawn_backend(reload: bool) -> io::Result<Child> {
    let exe = std::env::current_exe()?;
    info!(executable = %exe.display(), reload, "starting backend process");

    let mut command = Command::new(&exe);
    command.arg("backend");
    if reload {
        command.arg("reload");
    }
    command.stdout(Stdio::inherit()).stderr(Stdio::inherit());

    command.spawn()
}
