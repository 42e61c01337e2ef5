// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 集成测试共用设施
//!
//! `FakeSiteEngine` 用罐装HTML在内存里模拟整个站点，使端到端
//! 场景不依赖网络；`SiteBuilder` 生成与参考解析器选择器匹配的
//! 页面。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cinecrawl::application::run_controller::RunController;
use cinecrawl::config::settings::{
    CrawlSettings, FetchSettings, LimitSettings, Settings, SiteSettings, ThrottleSettings,
};
use cinecrawl::domain::services::exporter::CollectingExporter;
use cinecrawl::domain::services::parser_registry::ParserRegistry;
use cinecrawl::engines::router::EngineRouter;
use cinecrawl::engines::traits::{EngineError, FetchEngine, FetchRequest, FetchResponse};
use cinecrawl::parsers::cinema::{register_cinema_parsers, CinemaConfig};
use url::Url;

pub const BASE: &str = "https://site.test";

/// 内存站点引擎
///
/// 命中的URL返回罐装页面；预置失败次数的URL先返回500；
/// 未知URL返回404。记录全部访问用于断言抓取次数。
pub struct FakeSiteEngine {
    pages: HashMap<String, String>,
    failures: Mutex<HashMap<String, u32>>,
    hits: Mutex<Vec<String>>,
}

impl FakeSiteEngine {
    pub fn new(pages: HashMap<String, String>) -> Self {
        Self {
            pages,
            failures: Mutex::new(HashMap::new()),
            hits: Mutex::new(Vec::new()),
        }
    }

    /// 让指定URL先失败N次再正常返回
    pub fn fail_first(&self, url: &str, times: u32) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }

    /// 某URL被抓取的次数
    pub fn hit_count(&self, url: &str) -> usize {
        self.hits.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    /// 抓取过的URL总数
    pub fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().len()
    }
}

#[async_trait]
impl FetchEngine for FakeSiteEngine {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        self.hits.lock().unwrap().push(request.url.clone());

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&request.url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(FetchResponse {
                        status: 500,
                        body: String::new(),
                        content_type: "text/html".to_string(),
                        headers: HashMap::new(),
                        elapsed_ms: 1,
                    });
                }
            }
        }

        match self.pages.get(&request.url) {
            Some(body) => Ok(FetchResponse {
                status: 200,
                body: body.clone(),
                content_type: "text/html".to_string(),
                headers: HashMap::new(),
                elapsed_ms: 1,
            }),
            None => Ok(FetchResponse {
                status: 404,
                body: String::new(),
                content_type: "text/html".to_string(),
                headers: HashMap::new(),
                elapsed_ms: 1,
            }),
        }
    }

    fn support_score(&self, _request: &FetchRequest) -> u8 {
        100
    }

    fn name(&self) -> &'static str {
        "fake-site"
    }
}

/// 罐装站点构建器
///
/// 页面结构与 `parsers::cinema` 的选择器保持一致。
#[derive(Default)]
pub struct SiteBuilder {
    pages: HashMap<String, String>,
}

impl SiteBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing_url(page: u32) -> String {
        format!("{}/films/?page={}", BASE, page)
    }

    pub fn detail_url(id: u64) -> String {
        format!("{}/film/fichefilm_gen_cfilm={}.html", BASE, id)
    }

    pub fn box_office_url(id: u64) -> String {
        format!("{}/film/fichefilm-{}/box-office/", BASE, id)
    }

    pub fn trailer_url(id: u64) -> String {
        format!("{}/video/player_gen_cmedia={}.html", BASE, id)
    }

    /// 一个列表页：若干详情链接加可选的下一页链接
    pub fn listing_page(mut self, page: u32, detail_ids: &[u64], next_page: Option<u32>) -> Self {
        let mut links = String::new();
        for id in detail_ids {
            links.push_str(&format!(
                r#"<a class="meta-title-link" href="/film/fichefilm_gen_cfilm={}.html">Film {}</a>"#,
                id, id
            ));
        }
        if let Some(next) = next_page {
            links.push_str(&format!(
                r#"<div class="pagination"><a class="next" href="/films/?page={}">Suivant</a></div>"#,
                next
            ));
        }
        self.pages.insert(
            Self::listing_url(page),
            format!("<html><body>{}</body></html>", links),
        );
        self
    }

    /// 一个详情页，年份可缺省
    pub fn detail_page(mut self, id: u64, title: &str, year: Option<&str>) -> Self {
        let year_block = match year {
            Some(year) => format!(
                r#"<div class="item"><span class="what">Année de production</span><span class="that">{}</span></div>"#,
                year
            ),
            None => String::new(),
        };
        let html = format!(
            r#"<html><body>
              <div class="titlebar-title">{}</div>
              <div class="content-txt"><p class="bo-p">Synopsis du film {}.</p></div>
              <div class="meta-body">
                <span class="date">12 mars 2021</span>
                <div class="meta-body-info">1h 58min
                  <span class="dark-grey-link">Drame</span>
                </div>
                <div class="meta-body-direction"><span class="dark-grey-link">Jeanne Martin</span></div>
                <div class="meta-body-actor"><a>Paul Durand</a></div>
              </div>
              <div class="rating-item">
                <span class="rating-title">Presse</span>
                <span class="stareval-note">3,5</span>
              </div>
              {}
            </body></html>"#,
            title, id, year_block
        );
        self.pages.insert(Self::detail_url(id), html);
        self
    }

    /// 一个票房页，可带或不带预告片引用
    pub fn box_office_page(mut self, id: u64, with_trailer: bool) -> Self {
        let trailer_block = if with_trailer {
            format!(
                r#"<div class="roller-slider"><a class="trailer roller-item" href="/video/player_gen_cmedia={}.html">BA</a></div>"#,
                id
            )
        } else {
            String::new()
        };
        let html = format!(
            r#"<html><body>
              <section>
                <h2>Box Office France</h2>
                <table class="box-office-table"><tbody><tr>
                  <td class="responsive-table-column first-col"><span>Semaine du 10 mars</span></td>
                  <td data-heading="Entrées">1 204 301</td>
                </tr></tbody></table>
              </section>
              {}
            </body></html>"#,
            trailer_block
        );
        self.pages.insert(Self::box_office_url(id), html);
        self
    }

    /// 一个预告片页
    pub fn trailer_page(mut self, id: u64, views: &str) -> Self {
        let html = format!(
            r#"<html><body>
              <div class="media-info-item-holder"><div class="icon-eye">{}</div></div>
            </body></html>"#,
            views
        );
        self.pages.insert(Self::trailer_url(id), html);
        self
    }

    /// 一条完整的记录链（详情 + 票房 + 预告片）
    pub fn full_record(self, id: u64, title: &str, year: &str) -> Self {
        self.detail_page(id, title, Some(year))
            .box_office_page(id, true)
            .trailer_page(id, "1 204 532")
    }

    /// 直接放置一个原始页面
    pub fn raw_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn build(self) -> Arc<FakeSiteEngine> {
        Arc::new(FakeSiteEngine::new(self.pages))
    }
}

/// 适合测试的快速配置：无延迟、快速重试、短宽限期
pub fn test_settings() -> Settings {
    Settings {
        crawl: CrawlSettings {
            seeds: Vec::new(),
            workers: 3,
            obey_robots: false,
            strict_identity: false,
            shutdown_grace_secs: 10,
            stats_interval_secs: 60,
        },
        fetch: FetchSettings {
            user_agent: "cinecrawl-test/1.0".to_string(),
            timeout_secs: 5,
            render_endpoint: None,
            cache_dir: None,
            max_retries: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            outage_threshold: 4,
        },
        throttle: ThrottleSettings {
            per_domain_concurrency: 4,
            requests_per_minute: None,
            download_delay_ms: 0,
            autothrottle: false,
            start_delay_ms: 0,
            max_delay_ms: 1000,
            target_concurrency: 1.0,
        },
        limits: LimitSettings {
            max_total_pages: None,
            max_records: None,
            max_pages_per_group: None,
        },
        site: SiteSettings {
            base_url: format!("{}/", BASE),
            year_cutoff: Some(2000),
            groups: None,
        },
    }
}

/// 装配一次以内存站点为渲染端的运行
pub fn build_run(
    settings: &Settings,
    engine: Arc<FakeSiteEngine>,
) -> (RunController, Arc<CollectingExporter>) {
    let mut registry = ParserRegistry::new();
    register_cinema_parsers(
        &mut registry,
        CinemaConfig {
            base_url: Url::parse(&settings.site.base_url).unwrap(),
            year_cutoff: settings.site.year_cutoff,
        },
    );

    let router = Arc::new(EngineRouter::new(vec![engine as Arc<dyn FetchEngine>]));
    let exporter = Arc::new(CollectingExporter::new());
    let controller = RunController::new(settings, Arc::new(registry), router, exporter.clone());
    (controller, exporter)
}
