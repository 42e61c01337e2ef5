// Copyright 2025 Kirky.X
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

use cinecrawl::application::run_controller::{RunController, Seed};
use cinecrawl::config::settings::Settings;
use cinecrawl::domain::services::exporter::JsonLinesExporter;
use cinecrawl::domain::services::parser_registry::ParserRegistry;
use cinecrawl::engines::cache_engine::CachingEngine;
use cinecrawl::engines::http_engine::HttpEngine;
use cinecrawl::engines::router::EngineRouter;
use cinecrawl::engines::splash_engine::SplashEngine;
use cinecrawl::engines::traits::FetchEngine;
use cinecrawl::parsers::cinema::{register_cinema_parsers, CinemaConfig};
use cinecrawl::utils::telemetry;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use url::Url;

/// 主函数
///
/// 应用程序入口点，负责装配组件、播种并等待运行结束
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting cinecrawl...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    if settings.crawl.seeds.is_empty() {
        error!("no seed urls configured, set CINECRAWL__CRAWL__SEEDS");
        anyhow::bail!("no seed urls configured");
    }

    // 3. Build parser registry
    let base_url = Url::parse(&settings.site.base_url)?;
    let mut registry = ParserRegistry::new();
    register_cinema_parsers(
        &mut registry,
        CinemaConfig {
            base_url,
            year_cutoff: settings.site.year_cutoff,
        },
    );
    let registry = Arc::new(registry);

    // 4. Build fetch engines
    let mut engines: Vec<Arc<dyn FetchEngine>> =
        vec![Arc::new(HttpEngine::new(settings.fetch.user_agent.clone()))];
    if let Some(endpoint) = &settings.fetch.render_endpoint {
        let endpoint = Url::parse(endpoint)?;
        engines.push(Arc::new(SplashEngine::new(
            endpoint,
            settings.fetch.user_agent.clone(),
        )));
        info!("render service engine enabled");
    }
    if let Some(cache_dir) = &settings.fetch.cache_dir {
        engines = engines
            .into_iter()
            .map(|engine| {
                Arc::new(CachingEngine::new(engine, cache_dir.clone())) as Arc<dyn FetchEngine>
            })
            .collect();
        info!("response cache enabled at {}", cache_dir);
    }
    let router = Arc::new(EngineRouter::new(engines));

    // 5. Assemble and start the run
    let exporter = Arc::new(JsonLinesExporter::new());
    let mut controller = RunController::new(&settings, registry, router, exporter);

    let seeds: Vec<Seed> = settings
        .crawl
        .seeds
        .iter()
        .map(|entry| match entry.split_once('|') {
            // "url|group" 形式的种子带分组标注
            Some((url, group)) => Seed::grouped(url.trim(), group.trim()),
            None => Seed::bare(entry.trim()),
        })
        .collect();
    controller.start(&seeds);

    // 6. Wait for completion or shutdown signal
    let handle = controller.handle();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                handle.stop();
            }
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }
    });

    let stats = controller.await_completion().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
