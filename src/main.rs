// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use clap::Parser;

use kexec::{cli::Cli, exec::ExecSession, utils::init_logging};

mod app;

use app::initialization::initialize_app;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let ctx = initialize_app(&cli).await?;
    let session = ExecSession::new(ctx.pod, ctx.command, ctx.namespace, ctx.options)?;
    let outcome = session.run().await;

    tracing::debug!(
        "Session ended: {:?} (success: {}, exit code: {:?})",
        outcome.reason,
        outcome.success,
        outcome.exit_code
    );
    std::process::exit(outcome.process_exit_code());
}
