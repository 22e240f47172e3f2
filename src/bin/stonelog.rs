// Copyright 2026 The stonelog Authors
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

use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use tokio::runtime;
use tracing::{error, info};

use stonelog::{setup_tracing, AppResult, MessageStore, StoreConfig};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        error!("stonelog failed to start: {e}");
        eprintln!("stonelog failed to start: {e}");
        std::process::exit(1);
    }
}

fn run() -> AppResult<()> {
    let commandline = CommandLine::parse();
    dotenv().ok();

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async {
        setup_tracing()?;

        let config_path = commandline
            .conf
            .as_ref()
            .map_or_else(|| PathBuf::from("./conf.toml"), PathBuf::from);
        let config = StoreConfig::set_up_config(config_path)?;

        let store = MessageStore::open(config).await?;
        info!("stonelog serving {} topics", store.topic_list().len());

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        store.close().await;
        Ok(())
    })
}
