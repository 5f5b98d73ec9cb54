// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt;
use std::sync::OnceLock;

use chrono::Local;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

use crate::common::app_config::BasaltConfig;

static INIT: OnceLock<()> = OnceLock::new();

/// One event per line:
/// `2026-08-02 05:09:01.123456 DEBUG latch-worker src/storage/spanlatch/mod.rs:413: message`
///
/// Unnamed threads fall back to their numeric id so concurrent latch tests
/// stay attributable.
struct LineFormatter;

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} {:<5} ",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            metadata.level()
        )?;

        let current = std::thread::current();
        match current.name() {
            Some(name) => write!(writer, "{name} ")?,
            None => write!(writer, "{:?} ", current.id())?,
        }

        // Point at the call site when it is known, otherwise at the target
        // module.
        match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => write!(writer, "{file}:{line}: ")?,
            _ => write!(writer, "{}: ", metadata.target())?,
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the process-wide subscriber. `level` is a full EnvFilter
/// expression (`"info"`, `"basalt=debug"`, ...); the `BASALT_LOG`
/// environment variable overrides it when set. Subsequent calls are no-ops.
pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_env("BASALT_LOG").unwrap_or_else(|_| EnvFilter::new(level));

        // ANSI colors only on a real terminal; escape codes in a redirected
        // log file are garbage.
        let _ = tracing_fmt()
            .with_ansi(atty::is(atty::Stream::Stderr))
            .event_format(LineFormatter)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Initialize from a loaded config, honoring `log_filter` over `log_level`.
pub fn init_from_config(cfg: &BasaltConfig) {
    init_with_level(&cfg.effective_log_filter());
}

pub fn init() {
    init_with_level("info");
}

pub use tracing::{debug, error, info, trace, warn};
