// moon: The build system and package manager for MoonBit.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.


use std::sync::OnceLock;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static SHUTDOWN_TOKEN: OnceLock<CancellationToken> = OnceLock::new();
static SHUTDOWN_HANDLER: OnceLock<()> = OnceLock::new();

/// Installs the termination handler once and returns the token it cancels.
pub fn setup_shutdown_handler() -> anyhow::Result<CancellationToken> {
    let token = SHUTDOWN_TOKEN.get_or_init(CancellationToken::new).clone();
    if SHUTDOWN_HANDLER.get().is_some() {
        return Ok(token);
    }

    #[cfg(unix)]
    {
        use signal_hook::consts::signal::*;
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT])
            .context("Failed to register signal handler")?;
        let token = token.clone();
        std::thread::spawn(move || {
            for signal in signals.forever() {
                debug!("Received termination signal: {:?}", signal);
                token.cancel();
            }
        });
    }

    #[cfg(windows)]
    {
        let token = token.clone();
        ctrlc::set_handler(move || {
            debug!("Received termination signal");
            token.cancel();
        })
        .context("Failed to register Ctrl-C handler")?;
    }

    let _ = SHUTDOWN_HANDLER.set(());
    Ok(token)
}
