//! Shared helpers for tests that run fake tool scripts
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use armory_core::application::{InvokerConfig, ToolInvoker};
use armory_core::port::time_provider::SystemTimeProvider;
use armory_core::port::ProcessRunner;
use armory_infra_system::{SubprocessRunner, SystemHealthProbe};

static SERIAL: Mutex<()> = Mutex::new(());

/// Serialize tests in one binary.
///
/// A script written by one test can fail with ETXTBSY if another test forks
/// while the script's write handle is still open.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write an executable `/bin/sh` script
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();

    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

pub fn runner() -> Arc<dyn ProcessRunner> {
    Arc::new(
        SubprocessRunner::new(Arc::new(SystemTimeProvider))
            .with_kill_grace(Duration::from_millis(500)),
    )
}

pub fn invoker(runner: Arc<dyn ProcessRunner>) -> ToolInvoker {
    ToolInvoker::new(runner, InvokerConfig::default())
}

pub fn probe(runner: Arc<dyn ProcessRunner>) -> Arc<SystemHealthProbe> {
    Arc::new(SystemHealthProbe::new(runner))
}
