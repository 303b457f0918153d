// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::net::{FrameCodec, LenWidth};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// The player-facing gate: listener, limits and framing.
    pub gate: GateConfig,
    /// Operator console; disabled when the port is 0.
    #[serde(default)]
    pub console: ConsoleConfig,
    /// Per-module channel sizing.
    #[serde(default)]
    pub channels: ChannelConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GateConfig {
    /// Listen address, `host:port`.
    pub addr: String,
    #[serde(default = "default_max_conn_num")]
    pub max_conn_num: usize,
    #[serde(default = "default_pending_write_num")]
    pub pending_write_num: usize,
    pub frame: FrameConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FrameConfig {
    /// Width of the length prefix: 1, 2 or 4 bytes.
    pub len_bytes: u8,
    #[serde(default)]
    pub little_endian: bool,
    #[serde(default = "default_min_msg_len")]
    pub min_msg_len: u32,
    #[serde(default = "default_max_msg_len")]
    pub max_msg_len: u32,
}

impl FrameConfig {
    pub fn codec(&self) -> Result<FrameCodec> {
        let width = match self.len_bytes {
            1 => LenWidth::U8,
            2 => LenWidth::U16,
            4 => LenWidth::U32,
            n => anyhow::bail!("len_bytes must be 1, 2 or 4, got {n}"),
        };
        Ok(FrameCodec::new(
            width,
            self.little_endian,
            self.min_msg_len,
            self.max_msg_len,
        ))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            port: 0,
            prompt: default_prompt(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChannelConfig {
    #[serde(default = "default_chan_len")]
    pub go_len: usize,
    #[serde(default = "default_chan_len")]
    pub timer_len: usize,
    #[serde(default = "default_chan_len")]
    pub server_len: usize,
    #[serde(default = "default_command_len")]
    pub command_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            go_len: default_chan_len(),
            timer_len: default_chan_len(),
            server_len: default_chan_len(),
            command_len: default_command_len(),
        }
    }
}

impl ChannelConfig {
    pub fn skeleton(&self) -> crate::module::SkeletonBuilder {
        crate::module::SkeletonBuilder {
            go_len: self.go_len,
            timer_len: self.timer_len,
            server_len: self.server_len,
            command_len: self.command_len,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.gate.addr.is_empty(), "gate.addr must be set");
        ensure!(
            self.gate.frame.min_msg_len <= self.gate.frame.max_msg_len,
            "frame.min_msg_len must not exceed frame.max_msg_len"
        );
        self.gate.frame.codec().map(|_| ())
    }
}

fn default_max_conn_num() -> usize {
    100
}

fn default_pending_write_num() -> usize {
    100
}

fn default_min_msg_len() -> u32 {
    1
}

fn default_max_msg_len() -> u32 {
    4096
}

fn default_prompt() -> String {
    "# ".to_string()
}

fn default_chan_len() -> usize {
    64
}

fn default_command_len() -> usize {
    16
}
