// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 影片站点的参考解析器集
//!
//! 按列表→详情→票房→预告片的链为每种页面实现 `PageParser`。
//! 提取规则是站点相关的可替换胶水：编排核心只消费
//! `ParseOutput`，换一个站点只需要换掉这里的注册。
//!
//! 缺失片段的文档化默认值：文本字段 `"Non disponible"`、
//! 数值字段 0、列表字段空表。解析器绝不因可选片段缺失而报错。

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use url::Url;

use crate::domain::models::record::{FieldValue, RecordIdentity};
use crate::domain::models::task::{CrawlTask, PageType, CTX_WAIT_MS};
use crate::domain::services::parser_registry::{PageParser, ParseError, ParseOutput, ParserRegistry};
use crate::utils::url_utils;

/// 缺失文本字段的默认值
pub const MISSING_TEXT: &str = "Non disponible";

/// 票房页的渲染等待毫秒数
const BOX_OFFICE_WAIT_MS: u64 = 1000;
/// 预告片页的渲染等待毫秒数
const TRAILER_WAIT_MS: u64 = 2000;

static SEL_DETAIL_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.meta-title-link").unwrap());
static SEL_NEXT_PAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".pagination a.next, a[rel='next']").unwrap());
static SEL_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("div.titlebar-title").unwrap());
static SEL_SYNOPSIS_P: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.content-txt p.bo-p").unwrap());
static SEL_SYNOPSIS_DIV: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.content-txt").unwrap());
static SEL_CERTIFICATE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.certificate span.certificate-text").unwrap());
static SEL_META: Lazy<Selector> = Lazy::new(|| Selector::parse("div.meta-body").unwrap());
static SEL_DATE: Lazy<Selector> = Lazy::new(|| Selector::parse("span.date").unwrap());
static SEL_META_INFO: Lazy<Selector> = Lazy::new(|| Selector::parse(".meta-body-info").unwrap());
static SEL_GENRE_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".meta-body-info span.dark-grey-link").unwrap());
static SEL_DIRECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".meta-body-direction span.dark-grey-link").unwrap());
static SEL_ACTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".meta-body-actor a, .meta-body-actor span.dark-grey-link").unwrap());
static SEL_RATING_ITEM: Lazy<Selector> = Lazy::new(|| Selector::parse("div.rating-item").unwrap());
static SEL_RATING_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.rating-title").unwrap());
static SEL_RATING_NOTE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.stareval-note").unwrap());
static SEL_TECH_ITEM: Lazy<Selector> = Lazy::new(|| Selector::parse("div.item").unwrap());
static SEL_TECH_WHAT: Lazy<Selector> = Lazy::new(|| Selector::parse("span.what").unwrap());
static SEL_TECH_THAT: Lazy<Selector> = Lazy::new(|| Selector::parse("span.that").unwrap());
static SEL_NATIONALITY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.nationality").unwrap());
static SEL_SECTION: Lazy<Selector> = Lazy::new(|| Selector::parse("section").unwrap());
static SEL_H2: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").unwrap());
static SEL_BO_ROW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.box-office-table tbody tr").unwrap());
static SEL_BO_WEEK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td.responsive-table-column.first-col span").unwrap());
static SEL_BO_ENTRIES: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"td[data-heading="Entrées"]"#).unwrap());
static SEL_TRAILER_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.roller-slider a.trailer.roller-item").unwrap());
static SEL_TRAILER_VIEWS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.media-info-item-holder div.icon-eye").unwrap());

static RE_DURATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+h\s?\d*min").unwrap());

/// 参考解析器的站点配置
#[derive(Debug, Clone)]
pub struct CinemaConfig {
    /// 相对链接解析用的站点根地址
    pub base_url: Url,
    /// 年份截止线，早于该年的影片在详情阶段被放弃
    pub year_cutoff: Option<i32>,
}

/// 把四个参考解析器装进注册表
pub fn register_cinema_parsers(registry: &mut ParserRegistry, config: CinemaConfig) {
    let config = Arc::new(config);
    registry.register(
        PageType::Listing,
        Arc::new(ListingParser {
            config: config.clone(),
        }),
    );
    registry.register(
        PageType::Detail,
        Arc::new(DetailParser {
            config: config.clone(),
        }),
    );
    registry.register(PageType::BoxOffice, Arc::new(BoxOfficeParser { config }));
    registry.register(PageType::Trailer, Arc::new(TrailerParser));
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
}

fn text_or_missing(value: Option<String>) -> FieldValue {
    FieldValue::Text(value.unwrap_or_else(|| MISSING_TEXT.to_string()))
}

/// 在技术信息区找到指定标签对应的值
fn labelled_value(doc: &Html, label: &str) -> Option<String> {
    for item in doc.select(&SEL_TECH_ITEM) {
        let what = item.select(&SEL_TECH_WHAT).next().map(element_text);
        if what.is_some_and(|w| w.contains(label)) {
            return item
                .select(&SEL_TECH_THAT)
                .next()
                .map(element_text)
                .filter(|s| !s.is_empty());
        }
    }
    None
}

/// 读取指定标题的评分块里的分数
fn rating_for(doc: &Html, title_contains: &str) -> Option<f64> {
    for item in doc.select(&SEL_RATING_ITEM) {
        let title = item.select(&SEL_RATING_TITLE).next().map(element_text);
        if title.is_some_and(|t| t.contains(title_contains)) {
            return item
                .select(&SEL_RATING_NOTE)
                .next()
                .map(element_text)
                .and_then(|s| s.replace(',', ".").trim().parse().ok());
        }
    }
    None
}

/// 列表页解析器
///
/// 发现详情链接（附带派生的记录标识）和至多一个下一页链接。
/// 空列表页（既无详情也无下一页）给出 Terminal，分页链在此
/// 自然结束。
struct ListingParser {
    config: Arc<CinemaConfig>,
}

impl PageParser for ListingParser {
    fn parse(&self, html: &str, task: &CrawlTask) -> Result<ParseOutput, ParseError> {
        let doc = Html::parse_document(html);
        let page_url = Url::parse(&task.url).unwrap_or_else(|_| self.config.base_url.clone());
        let mut tasks = Vec::new();

        for link in doc.select(&SEL_DETAIL_LINK) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Ok(detail_url) = url_utils::resolve_url(&page_url, href) else {
                continue;
            };
            let mut detail = CrawlTask::new(PageType::Detail, detail_url.as_str());
            if let Some(identity) = RecordIdentity::from_detail_url(detail_url.as_str()) {
                detail = detail.with_record_id(identity);
            }
            tasks.push(detail);
        }

        let next = doc
            .select(&SEL_NEXT_PAGE)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| url_utils::resolve_url(&page_url, href).ok());
        if let Some(next_url) = next {
            tasks.push(CrawlTask::new(PageType::Listing, next_url.as_str()));
        }

        if tasks.is_empty() {
            return Ok(ParseOutput::terminal(Vec::new()));
        }
        Ok(ParseOutput::advancing(Vec::new(), tasks))
    }
}

/// 详情页解析器
///
/// 提取影片主体字段并派生票房任务。结构性前置条件：制作年份
/// 早于截止线或格式非法时给出 Skip，整条记录被放弃。
struct DetailParser {
    config: Arc<CinemaConfig>,
}

impl DetailParser {
    /// 详情URL到票房URL的站点变换
    fn box_office_url(detail_url: &str) -> String {
        let mut url = detail_url
            .replace("_gen_cfilm=", "-")
            .replace(".html", "/");
        if !url.ends_with('/') {
            url.push('/');
        }
        format!("{}box-office/", url)
    }
}

impl PageParser for DetailParser {
    fn parse(&self, html: &str, task: &CrawlTask) -> Result<ParseOutput, ParseError> {
        let doc = Html::parse_document(html);
        let mut fields: Vec<(String, FieldValue)> = Vec::new();

        fields.push(("film_title".into(), text_or_missing(first_text(&doc, &SEL_TITLE))));
        fields.push(("film_url".into(), FieldValue::Text(task.url.clone())));
        let synopsis =
            first_text(&doc, &SEL_SYNOPSIS_P).or_else(|| first_text(&doc, &SEL_SYNOPSIS_DIV));
        fields.push(("synopsis".into(), text_or_missing(synopsis)));
        fields.push((
            "age_classification".into(),
            text_or_missing(first_text(&doc, &SEL_CERTIFICATE)),
        ));

        let meta = doc.select(&SEL_META).next();
        let release_date = meta
            .and_then(|m| m.select(&SEL_DATE).next())
            .map(element_text)
            .filter(|s| !s.is_empty());
        fields.push(("release_date".into(), text_or_missing(release_date)));

        let info_text = meta
            .map(|m| {
                m.select(&SEL_META_INFO)
                    .map(element_text)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let duration = RE_DURATION.find(&info_text).map(|m| m.as_str().to_string());
        fields.push(("duration".into(), text_or_missing(duration)));

        let genres: Vec<String> = doc
            .select(&SEL_GENRE_LINK)
            .map(element_text)
            .filter(|s| !s.is_empty())
            .collect();
        let mut deduped_genres = Vec::new();
        for genre in genres {
            if !deduped_genres.contains(&genre) {
                deduped_genres.push(genre);
            }
        }
        fields.push(("associated_genres".into(), FieldValue::List(deduped_genres)));

        fields.push((
            "director".into(),
            text_or_missing(first_text(&doc, &SEL_DIRECTOR)),
        ));

        let actors: Vec<String> = doc
            .select(&SEL_ACTOR)
            .map(element_text)
            .filter(|s| !s.is_empty())
            .collect();
        let mut top_stars = Vec::new();
        for actor in actors {
            if !top_stars.contains(&actor) {
                top_stars.push(actor);
            }
        }
        fields.push(("top_stars".into(), FieldValue::List(top_stars)));

        fields.push((
            "press_rating".into(),
            FieldValue::Number(rating_for(&doc, "Presse").unwrap_or(0.0)),
        ));
        fields.push((
            "viewer_rating".into(),
            FieldValue::Number(rating_for(&doc, "Spectateurs").unwrap_or(0.0)),
        ));

        fields.push((
            "languages".into(),
            text_or_missing(labelled_value(&doc, "Langues")),
        ));
        fields.push((
            "distributor".into(),
            text_or_missing(labelled_value(&doc, "Distributeur")),
        ));
        fields.push((
            "budget".into(),
            text_or_missing(labelled_value(&doc, "Budget")),
        ));

        let nationalities: Vec<String> = doc
            .select(&SEL_NATIONALITY)
            .map(element_text)
            .filter(|s| !s.is_empty())
            .collect();
        fields.push(("film_nationality".into(), FieldValue::List(nationalities)));

        // 结构性前置条件：年份字段缺失时记录继续（默认 0），
        // 格式非法或早于截止线时整条记录放弃
        let year_text = labelled_value(&doc, "Année de production");
        let year = match year_text {
            None => None,
            Some(text) => match text.trim().parse::<i32>() {
                Ok(year) => Some(year),
                Err(_) => {
                    tracing::warn!("invalid production year '{}', skipping record", text);
                    return Ok(ParseOutput::skip());
                }
            },
        };
        if let (Some(year), Some(cutoff)) = (year, self.config.year_cutoff) {
            if year < cutoff {
                tracing::info!("skipping record older than cutoff (year: {})", year);
                return Ok(ParseOutput::skip());
            }
        }
        fields.push((
            "year_of_production".into(),
            FieldValue::Number(year.unwrap_or(0) as f64),
        ));

        let box_office = CrawlTask::new(PageType::BoxOffice, Self::box_office_url(&task.url))
            .with_context(CTX_WAIT_MS, BOX_OFFICE_WAIT_MS.to_string());
        let box_office = match &task.record_id {
            Some(identity) => box_office.with_record_id(identity.clone()),
            None => box_office,
        };

        Ok(ParseOutput::advancing(fields, vec![box_office]))
    }
}

/// 票房页解析器
///
/// 按节标题定位法国/美国票房表并取首行数据；页面上有预告片
/// 引用时派生预告片任务，否则记录带默认预告片字段定稿。
struct BoxOfficeParser {
    config: Arc<CinemaConfig>,
}

impl BoxOfficeParser {
    fn section_first_row<'a>(doc: &'a Html, title_contains: &str) -> Option<ElementRef<'a>> {
        for section in doc.select(&SEL_SECTION) {
            let heading = section.select(&SEL_H2).next().map(element_text);
            if heading.is_some_and(|h| h.contains(title_contains)) {
                return section.select(&SEL_BO_ROW).next();
            }
        }
        None
    }

    fn row_fields(
        row: Option<ElementRef>,
        week_key: &str,
        entries_key: &str,
        fields: &mut Vec<(String, FieldValue)>,
    ) {
        match row {
            Some(row) => {
                let week = row.select(&SEL_BO_WEEK).next().map(element_text);
                let entries = row.select(&SEL_BO_ENTRIES).next().map(element_text);
                fields.push((week_key.into(), text_or_missing(week)));
                fields.push((entries_key.into(), text_or_missing(entries)));
            }
            None => {
                fields.push((week_key.into(), FieldValue::Text(String::new())));
                fields.push((entries_key.into(), FieldValue::Text(String::new())));
            }
        }
    }
}

impl PageParser for BoxOfficeParser {
    fn parse(&self, html: &str, task: &CrawlTask) -> Result<ParseOutput, ParseError> {
        let doc = Html::parse_document(html);
        let mut fields: Vec<(String, FieldValue)> = Vec::new();

        Self::row_fields(
            Self::section_first_row(&doc, "Box Office France"),
            "fr_entry_week",
            "fr_entries",
            &mut fields,
        );
        Self::row_fields(
            Self::section_first_row(&doc, "Box Office US"),
            "us_entry_week",
            "us_entries",
            &mut fields,
        );

        let trailer_href = doc
            .select(&SEL_TRAILER_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| url_utils::resolve_url(&self.config.base_url, href).ok());

        match trailer_href {
            Some(trailer_url) => {
                let trailer = CrawlTask::new(PageType::Trailer, trailer_url.as_str())
                    .with_context(CTX_WAIT_MS, TRAILER_WAIT_MS.to_string());
                let trailer = match &task.record_id {
                    Some(identity) => trailer.with_record_id(identity.clone()),
                    None => trailer,
                };
                Ok(ParseOutput::advancing(fields, vec![trailer]))
            }
            None => {
                // 预告片是可选阶段：引用缺失时记录带默认字段定稿
                fields.push((
                    "trailer_views".into(),
                    FieldValue::Text(MISSING_TEXT.to_string()),
                ));
                Ok(ParseOutput::terminal(fields))
            }
        }
    }
}

/// 预告片页解析器
///
/// 链的最后一个阶段，永远 Terminal。
struct TrailerParser;

impl PageParser for TrailerParser {
    fn parse(&self, html: &str, _task: &CrawlTask) -> Result<ParseOutput, ParseError> {
        let doc = Html::parse_document(html);
        let views = doc
            .select(&SEL_TRAILER_VIEWS)
            .next()
            .map(element_text)
            .filter(|s| !s.is_empty())
            .map(|s| s.replace(' ', ","));

        Ok(ParseOutput::terminal(vec![(
            "trailer_views".into(),
            text_or_missing(views),
        )]))
    }
}
