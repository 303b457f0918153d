// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Environment variable overriding the config path passed on the command
/// line (useful for containerised deployments).
pub const CONFIG_ENV: &str = "FROND_CONFIG";

/// Resolve the effective config path: the first CLI argument, then
/// `FROND_CONFIG`, then `rel`; relative paths are anchored at the current
/// working directory and canonicalised.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let chosen = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| rel.to_string());

    let p = Path::new(&chosen);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}
