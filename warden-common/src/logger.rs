// Copyright 2025 OPPO.
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

use crate::conf::LogConf;
use once_cell::sync::OnceCell;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOGGER: OnceCell<()> = OnceCell::new();

pub struct Logger;

impl Logger {
    /// Install the global subscriber. `log` records are bridged by the subscriber.
    /// Only the first call has an effect.
    pub fn init(conf: &LogConf) {
        LOGGER.get_or_init(|| {
            let filter = EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&conf.level))
                .unwrap_or_else(|_| EnvFilter::new("info"));

            let res = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(conf.display_target)
                .with_ansi(conf.ansi)
                .finish()
                .try_init();

            if let Err(e) = res {
                eprintln!("logger already initialized: {}", e);
            }
        });
    }

    pub fn init_default() {
        Self::init(&LogConf::default())
    }
}
