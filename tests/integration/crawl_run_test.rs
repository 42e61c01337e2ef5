// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 采集链的端到端场景
//!
//! 全部跑在内存站点上：播种一个列表页，断言定稿记录、计数器
//! 和终止行为。每个场景都包着超时，静止检测失效会直接暴露。

use std::time::Duration;

use cinecrawl::application::run_controller::{RunController, Seed};
use cinecrawl::application::run_state::RunStats;
use cinecrawl::domain::models::record::FinalizedRecord;
use cinecrawl::domain::models::task::PageType;

use crate::helpers::{build_run, test_settings, SiteBuilder};

async fn run_to_completion(mut controller: RunController, seeds: &[Seed]) -> RunStats {
    controller.start(seeds);
    tokio::time::timeout(Duration::from_secs(30), controller.await_completion())
        .await
        .expect("run did not reach quiescence in time")
}

fn sorted_titles(records: &[FinalizedRecord]) -> Vec<String> {
    let mut titles: Vec<String> = records
        .iter()
        .map(|r| r.text("film_title").unwrap_or_default().to_string())
        .collect();
    titles.sort();
    titles
}

#[tokio::test]
async fn test_three_records_from_paginated_listing() {
    // 列表页1：三个详情链接 + 指向空列表页2的下一页链接
    let engine = SiteBuilder::new()
        .listing_page(1, &[100, 200, 300], Some(2))
        .listing_page(2, &[], None)
        .full_record(100, "Film Cent", "2021")
        .full_record(200, "Film Deux", "2010")
        .full_record(300, "Film Trois", "2005")
        .build();

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine.clone());
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert_eq!(stats.records_finalized, 3);
    assert_eq!(stats.records_skipped, 0);
    assert!(!stats.aborted);

    let records = exporter.take();
    assert_eq!(
        sorted_titles(&records),
        vec!["Film Cent", "Film Deux", "Film Trois"]
    );

    // 分页链在空列表页后停止：页2只被抓取一次，没有页3
    assert_eq!(engine.hit_count(&SiteBuilder::listing_url(2)), 1);
    // 2个列表页 + 3条链各3页
    assert_eq!(stats.pages_fetched, 11);
    assert_eq!(engine.total_hits(), 11);
}

#[tokio::test]
async fn test_chain_stages_apply_in_order() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100], None)
        .full_record(100, "Film Cent", "2021")
        .build();

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine);
    run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    let records = exporter.take();
    assert_eq!(records.len(), 1);
    let record = &records[0];

    // 链顺序不变量：详情先于票房先于预告片
    assert_eq!(
        record.stage_sequence,
        vec![PageType::Detail, PageType::BoxOffice, PageType::Trailer]
    );
    // 后阶段的字段确实进入了记录
    assert_eq!(record.text("fr_entries"), Some("1 204 301"));
    assert_eq!(record.text("trailer_views"), Some("1,204,532"));
}

#[tokio::test]
async fn test_duplicate_detail_url_is_fetched_once() {
    // 两个列表页并发地发现同一个详情URL
    let engine = SiteBuilder::new()
        .listing_page(1, &[100], Some(2))
        .listing_page(2, &[100], None)
        .full_record(100, "Film Cent", "2021")
        .build();

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine.clone());
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert_eq!(stats.records_finalized, 1);
    assert_eq!(exporter.len(), 1);
    assert_eq!(engine.hit_count(&SiteBuilder::detail_url(100)), 1);
    assert_eq!(stats.identities_seen, 1);
}

#[tokio::test]
async fn test_old_record_is_skipped_and_not_exported() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100, 200], None)
        .full_record(100, "Film Récent", "2021")
        // 早于截止线（2000）的记录在详情阶段被放弃
        .full_record(200, "Film Ancien", "1997")
        .build();

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine.clone());
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert_eq!(stats.records_finalized, 1);
    assert_eq!(stats.records_skipped, 1);

    let records = exporter.take();
    assert_eq!(sorted_titles(&records), vec!["Film Récent"]);
    // 被放弃的记录不再产生后续页面抓取
    assert_eq!(engine.hit_count(&SiteBuilder::box_office_url(200)), 0);
}

#[tokio::test]
async fn test_missing_year_field_defaults_and_record_survives() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100], None)
        .detail_page(100, "Film Sans Année", None)
        .box_office_page(100, true)
        .trailer_page(100, "42")
        .build();

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine);
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert_eq!(stats.records_finalized, 1);
    let records = exporter.take();
    let record = &records[0];
    // 缺失的年份落到默认值 0，链照常走完
    assert_eq!(
        record.fields.get("year_of_production"),
        Some(&cinecrawl::domain::models::record::FieldValue::Number(0.0))
    );
    assert_eq!(record.stage_sequence.len(), 3);
}

#[tokio::test]
async fn test_missing_trailer_finalizes_with_default() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100], None)
        .detail_page(100, "Film Sans BA", Some("2021"))
        .box_office_page(100, false)
        .build();

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine.clone());
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert_eq!(stats.records_finalized, 1);
    let records = exporter.take();
    let record = &records[0];
    assert_eq!(record.text("trailer_views"), Some("Non disponible"));
    assert_eq!(
        record.stage_sequence,
        vec![PageType::Detail, PageType::BoxOffice]
    );
    // 没有预告片引用就没有第三次抓取
    assert_eq!(engine.hit_count(&SiteBuilder::trailer_url(100)), 0);
}

#[tokio::test]
async fn test_record_limit_stops_run_early() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100, 200, 300], None)
        .full_record(100, "Film Cent", "2021")
        .full_record(200, "Film Deux", "2021")
        .full_record(300, "Film Trois", "2021")
        .build();

    let mut settings = test_settings();
    settings.limits.max_records = Some(1);
    let (controller, exporter) = build_run(&settings, engine);
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    // 有意的提前停止：恰好一条定稿，不算错误
    assert_eq!(stats.records_finalized, 1);
    assert_eq!(exporter.len(), 1);
    assert!(!stats.aborted);
}

#[tokio::test]
async fn test_page_budget_stops_run_early() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100, 200, 300], None)
        .full_record(100, "Film Cent", "2021")
        .full_record(200, "Film Deux", "2021")
        .full_record(300, "Film Trois", "2021")
        .build();

    let mut settings = test_settings();
    settings.limits.max_total_pages = Some(4);
    let (controller, _exporter) = build_run(&settings, engine.clone());
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert!(stats.pages_fetched <= 4);
    assert!(engine.total_hits() <= 4);
    assert!(!stats.aborted);
}

#[tokio::test]
async fn test_transient_failures_are_retried_through() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100], None)
        .full_record(100, "Film Têtu", "2021")
        .build();
    // 详情页先失败一次（500）再成功，重试策略应扛过去
    engine.fail_first(&SiteBuilder::detail_url(100), 1);

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine.clone());
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert_eq!(stats.records_finalized, 1);
    assert_eq!(exporter.len(), 1);
    assert_eq!(engine.hit_count(&SiteBuilder::detail_url(100)), 2);
}

#[tokio::test]
async fn test_retry_exhaustion_degrades_to_skip() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100, 200], None)
        .full_record(100, "Film Sain", "2021")
        .full_record(200, "Film Cassé", "2021")
        .build();
    // 比 max_retries(2) 更多的失败：该记录被放弃，运行继续
    engine.fail_first(&SiteBuilder::detail_url(200), 10);

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine);
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert_eq!(stats.records_finalized, 1);
    assert_eq!(stats.records_skipped, 1);
    assert_eq!(stats.pages_failed, 1);
    assert_eq!(sorted_titles(&exporter.take()), vec!["Film Sain"]);
}

#[tokio::test]
async fn test_trailer_fetch_failure_still_finalizes_record() {
    // 票房页引用了预告片，但预告片页不存在（404，不可重试）
    let engine = SiteBuilder::new()
        .listing_page(1, &[100], None)
        .detail_page(100, "Film Presque Complet", Some("2021"))
        .box_office_page(100, true)
        .build();

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine);
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    // 预告片是可选阶段：抓取失败时记录按已有字段定稿
    assert_eq!(stats.records_finalized, 1);
    let records = exporter.take();
    assert_eq!(records[0].text("fr_entries"), Some("1 204 301"));
    assert!(records[0].fields.get("trailer_views").is_none());
}

#[tokio::test]
async fn test_group_page_budget_bounds_pagination() {
    // 分组 Action 的分页链有三页，但每组预算只有两页
    let engine = SiteBuilder::new()
        .listing_page(1, &[100], Some(2))
        .listing_page(2, &[200], Some(3))
        .listing_page(3, &[300], None)
        .full_record(100, "Film Un", "2021")
        .full_record(200, "Film Deux", "2021")
        .full_record(300, "Film Trois", "2021")
        .build();

    let mut settings = test_settings();
    settings.limits.max_pages_per_group = Some(2);
    let (controller, exporter) = build_run(&settings, engine.clone());
    let stats = run_to_completion(
        controller,
        &[Seed::grouped(SiteBuilder::listing_url(1), "Action")],
    )
    .await;

    assert_eq!(engine.hit_count(&SiteBuilder::listing_url(3)), 0);
    assert_eq!(stats.records_finalized, 2);
    assert_eq!(sorted_titles(&exporter.take()), vec!["Film Deux", "Film Un"]);
}

#[tokio::test]
async fn test_group_allow_list_filters_seeds() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100], None)
        .listing_page(2, &[200], None)
        .full_record(100, "Film Action", "2021")
        .full_record(200, "Film Horreur", "2021")
        .build();

    let mut settings = test_settings();
    settings.site.groups = Some(vec!["Action".to_string()]);
    let (controller, exporter) = build_run(&settings, engine.clone());
    let stats = run_to_completion(
        controller,
        &[
            Seed::grouped(SiteBuilder::listing_url(1), "Action"),
            Seed::grouped(SiteBuilder::listing_url(2), "Horreur"),
        ],
    )
    .await;

    assert_eq!(stats.records_finalized, 1);
    assert_eq!(sorted_titles(&exporter.take()), vec!["Film Action"]);
    assert_eq!(engine.hit_count(&SiteBuilder::listing_url(2)), 0);
}

#[tokio::test]
async fn test_unidentifiable_detail_links_are_dropped_silently() {
    // 列表页带一个无法提取编号的详情链接
    let listing_html = r#"<html><body>
          <a class="meta-title-link" href="/film/fichefilm_gen_cfilm=100.html">Valide</a>
          <a class="meta-title-link" href="/film/le-film-sans-id/">Sans Id</a>
        </body></html>"#;
    let engine = SiteBuilder::new()
        .full_record(100, "Film Valide", "2021")
        .raw_page(&SiteBuilder::listing_url(1), listing_html)
        .build();

    let settings = test_settings();
    let (controller, exporter) = build_run(&settings, engine);
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    // 无法去重和装配的任务被静默丢弃并计数
    assert_eq!(stats.records_finalized, 1);
    assert_eq!(stats.records_dropped, 1);
    assert_eq!(sorted_titles(&exporter.take()), vec!["Film Valide"]);
}

#[tokio::test]
async fn test_cooperative_stop_reaches_completion() {
    let engine = SiteBuilder::new()
        .listing_page(1, &[100, 200, 300], None)
        .full_record(100, "Film Un", "2021")
        .full_record(200, "Film Deux", "2021")
        .full_record(300, "Film Trois", "2021")
        .build();

    let settings = test_settings();
    let (mut controller, _exporter) = build_run(&settings, engine);
    controller.start(&[Seed::bare(SiteBuilder::listing_url(1))]);

    // 立刻请求协作停止：不发放新任务，在途任务自然完成
    controller.stop();
    let stats = tokio::time::timeout(Duration::from_secs(30), controller.await_completion())
        .await
        .expect("stop did not complete in time");

    assert!(stats.records_finalized <= 3);
}

#[tokio::test]
async fn test_larger_site_reaches_quiescence() {
    // 4个工作器交错处理20条链，运行必须在有限步内静止
    let ids: Vec<u64> = (1..=20).map(|i| 1000 + i).collect();
    let mut builder = SiteBuilder::new().listing_page(1, &ids, None);
    for id in &ids {
        builder = builder.full_record(*id, &format!("Film {}", id), "2021");
    }
    let engine = builder.build();

    let mut settings = test_settings();
    settings.crawl.workers = 4;
    let (controller, exporter) = build_run(&settings, engine);
    let stats = run_to_completion(controller, &[Seed::bare(SiteBuilder::listing_url(1))]).await;

    assert_eq!(stats.records_finalized, 20);
    assert_eq!(exporter.len(), 20);
    // 1个列表页 + 20条链各3页
    assert_eq!(stats.pages_fetched, 61);
}
