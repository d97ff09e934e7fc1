//! Invokes the system C compiler to produce a temporary shared object
//! using the system C compiler, then `dlopen`'d via `libloading`.
//!
//! `cc::Build` is built for compiling static objects that `rustc` later
//! links in, not for producing a freestanding shared library at runtime —
//! so this module only borrows its compiler *discovery*
//! (`Build::get_compiler`) and drives the resulting `Tool` directly as a
//! one-off `Command`, the way `cc` itself does internally before handing
//! control to `ar`/the linker.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use metacall::MetacallError;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Picks a fresh path under the system temp directory for one compiled
/// unit's source and output, so concurrent loads never collide.
pub fn temp_paths(stem: &str) -> (PathBuf, PathBuf) {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let base = std::env::temp_dir().join(format!("metacall-c-{pid}-{id}-{stem}"));
    (base.with_extension("c"), dylib_path(&base))
}

#[cfg(target_os = "windows")]
fn dylib_path(base: &Path) -> PathBuf {
    base.with_extension("dll")
}

#[cfg(not(target_os = "windows"))]
fn dylib_path(base: &Path) -> PathBuf {
    base.with_extension("so")
}

/// Compiles `source_path` into a shared object at `output_path`, returning
/// a [`MetacallError::Load`] carrying the compiler's stderr on failure.
pub fn compile_shared_object(source_path: &Path, output_path: &Path) -> Result<(), MetacallError> {
    let tool = cc::Build::new().opt_level(0).cargo_metadata(false).get_compiler();
    let mut cmd = tool.to_command();

    #[cfg(target_os = "windows")]
    {
        cmd.arg("/LD").arg(source_path).arg(format!("/Fe:{}", output_path.display()));
    }
    #[cfg(not(target_os = "windows"))]
    {
        cmd.arg("-shared").arg("-fPIC").arg("-o").arg(output_path).arg(source_path);
    }

    let output = cmd.output().map_err(|e| MetacallError::Load {
        tag: "c".to_string(),
        name: source_path.display().to_string(),
        reason: format!("failed to spawn system compiler: {e}"),
    })?;

    if !output.status.success() {
        return Err(MetacallError::Load {
            tag: "c".to_string(),
            name: source_path.display().to_string(),
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}
