//! Compiled lua payloads pushed after scene loads.
//!
//! Each configured script is rebuilt through the sidecar compiler and
//! its bytecode kept in memory; when the compiler is unavailable a
//! stale `.luac` from a previous run is still usable.

use std::process::Command;

use tracing::{error, info};

/// Where scripts and their compiled output live.
pub const LUA_PATH_PREFIX: &str = "./data/lua/";

fn compiler() -> &'static str {
    if cfg!(windows) { "luac_hk4e.exe" } else { "luac_hk4e" }
}

/// Compile and read every configured script, in order.
///
/// Entries that fail to compile *and* have no stale output are skipped;
/// the rest of the list still loads.
pub fn load(names: &[String]) -> Vec<Vec<u8>> {
    let mut shells = Vec::new();
    for file_name in names {
        let Some(stem) = file_name.strip_suffix(".lua") else {
            error!("[luashell] not a lua file: {file_name}");
            continue;
        };
        let source = format!("{LUA_PATH_PREFIX}{stem}.lua");
        let compiled = format!("{LUA_PATH_PREFIX}{stem}.luac");

        match Command::new(compiler()).arg("-o").arg(&compiled).arg(&source).output() {
            Ok(out) if out.status.success() => {
                info!("[luashell] built {compiled}");
            }
            Ok(out) => {
                error!(
                    "[luashell] compile failed for {file_name}: {}, trying stale output",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            Err(e) => {
                error!("[luashell] compiler unavailable for {file_name}: {e}, trying stale output");
            }
        }

        match std::fs::read(&compiled) {
            Ok(bytes) => {
                info!("[luashell] loaded {compiled} ({} bytes)", bytes.len());
                shells.push(bytes);
            }
            Err(e) => error!("[luashell] read {compiled} failed: {e}"),
        }
    }
    shells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_lua_names_are_skipped() {
        assert!(load(&["startup.txt".into(), "also-not-lua".into()]).is_empty());
    }
}
