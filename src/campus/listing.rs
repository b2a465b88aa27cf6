//! Paginated walk over the syllabus search results.
//!
//! Result pages expire shortly after they are served, so the walker never
//! keeps a page around: every page after the first starts from a fresh search
//! and then jumps through the numbered page links, always taking the largest
//! page number not beyond the target. References are handed out lazily in
//! server order, page by page.

use std::collections::{BTreeMap, VecDeque};

use futures::Stream;
use http::Method;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::dom::{compile_selector, squeezed_text, text_of, texts_matching};
use super::form::{FieldKind, FieldPatch, FormError, FormSnapshot};
use super::handler::InlineCall;
use super::menu::{MenuHandle, NavigationError, dispatch, fetch_menu};
use crate::config::ListingLayout;
use crate::session::Session;
use crate::transport::{Credentials, PageResponse, PipelineError, RequestOptions};

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("search form not found on {url}")]
    SearchFormNotFound { url: Url },
    #[error("search rejected: {0}")]
    SearchRejected(String),
    #[error("result table not found on {url}")]
    TableNotFound { url: Url },
    #[error("result page {url} has no input form")]
    InputFormNotFound { url: Url },
    #[error("row {row} has an unexpected reference handler '{handler}'")]
    RowHandlerMismatch { row: usize, handler: String },
    #[error("result count not found on {url}")]
    ResultCountUnparseable { url: Url },
    #[error("could not reach page {target}, stuck at page {reached}")]
    PaginationLoop { target: usize, reached: usize },
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Search criteria: select field name to visible option label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    criteria: Vec<(String, String)>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose the option labelled `label` in the select named `field`.
    pub fn with(mut self, field: impl Into<String>, label: impl Into<String>) -> Self {
        let field = field.into();
        let label = label.into();
        match self.criteria.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = label,
            None => self.criteria.push((field, label)),
        }
        self
    }

    /// 開講所属
    pub fn department(self, label: impl Into<String>) -> Self {
        self.with("jikanwariShozokuCode", label)
    }

    /// 学期, e.g. `前学期`
    pub fn term(self, label: impl Into<String>) -> Self {
        self.with("gakkiKubunCode", label)
    }

    /// 年次, e.g. `1年`
    pub fn grade(self, label: impl Into<String>) -> Self {
        self.with("nenji", label)
    }

    pub fn criteria(&self) -> &[(String, String)] {
        &self.criteria
    }
}

/// Arguments of a row's `refer(nendo, jscd, jcd, locale)` handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingOptions {
    pub nendo: String,
    #[serde(rename = "jikanwariShozokuCode")]
    pub jikanwari_shozoku_code: String,
    pub jikanwaricd: String,
    pub locale: String,
}

impl RoutingOptions {
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("nendo", self.nendo.as_str()),
            ("jikanwariShozokuCode", self.jikanwari_shozoku_code.as_str()),
            ("jikanwaricd", self.jikanwaricd.as_str()),
            ("locale", self.locale.as_str()),
        ]
    }

    fn from_call(call: &InlineCall) -> Option<Self> {
        if call.args.len() != 4 {
            return None;
        }
        Some(Self {
            nendo: call.args[0].clone(),
            jikanwari_shozoku_code: call.args[1].clone(),
            jikanwaricd: call.args[2].clone(),
            locale: call.args[3].clone(),
        })
    }
}

/// Everything needed to request one result's detail page later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingReference {
    /// Fields of the result page's input form, as served.
    pub init_form: Vec<(String, String)>,
    /// Column header (whitespace removed) to cell text, in column order.
    pub digest: Vec<(String, String)>,
    pub method: String,
    pub url: Url,
    pub options: RoutingOptions,
}

impl ListingReference {
    pub fn method(&self) -> Method {
        if self.method.eq_ignore_ascii_case("POST") {
            Method::POST
        } else {
            Method::GET
        }
    }

    pub fn digest_value(&self, header: &str) -> Option<&str> {
        self.digest
            .iter()
            .find(|(name, _)| name == header)
            .map(|(_, value)| value.as_str())
    }

    /// Init form with the routing options laid over it.
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        let options = self.options.pairs();
        let mut pairs: Vec<(String, String)> = self
            .init_form
            .iter()
            .map(|(name, value)| {
                let value = options
                    .iter()
                    .find(|(key, _)| *key == name.as_str())
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_else(|| value.clone());
                (name.clone(), value)
            })
            .collect();
        for (key, value) in options {
            if !pairs.iter().any(|(name, _)| name == key) {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
        pairs
    }
}

struct ResultPage {
    references: Vec<ListingReference>,
    count: Result<usize, ListingError>,
}

/// Lazy, single-pass cursor over every search result.
pub struct ListingWalker {
    session: Session,
    layout: ListingLayout,
    query: SearchQuery,
    menu: Option<MenuHandle>,
    buffer: VecDeque<ListingReference>,
    deferred: Option<ListingError>,
    started: bool,
    finished: bool,
    page_count: Option<usize>,
    next_page: usize,
    replays: usize,
}

impl ListingWalker {
    pub fn new(session: Session, query: SearchQuery) -> Self {
        let layout = session.config().listing.clone();
        Self {
            session,
            layout,
            query,
            menu: None,
            buffer: VecDeque::new(),
            deferred: None,
            started: false,
            finished: false,
            page_count: None,
            next_page: 2,
            replays: 0,
        }
    }

    /// Reuse an already fetched menu instead of loading it on first use.
    pub fn with_menu(mut self, menu: MenuHandle) -> Self {
        self.menu = Some(menu);
        self
    }

    /// Full searches issued so far.
    pub fn search_replays(&self) -> usize {
        self.replays
    }

    /// Total pages, known once the first page has been read.
    pub fn page_count(&self) -> Option<usize> {
        self.page_count
    }

    /// Next reference, `None` once every page has been walked. After an
    /// error the walker is exhausted.
    pub async fn next(&mut self) -> Option<Result<ListingReference, ListingError>> {
        loop {
            if let Some(reference) = self.buffer.pop_front() {
                return Some(Ok(reference));
            }
            if let Some(err) = self.deferred.take() {
                self.finished = true;
                return Some(Err(err));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.advance().await {
                self.finished = true;
                return Some(Err(err));
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ListingReference, ListingError>> + Send {
        futures::stream::unfold(self, |mut walker| async move {
            walker.next().await.map(|item| (item, walker))
        })
    }

    async fn advance(&mut self) -> Result<(), ListingError> {
        if !self.started {
            self.started = true;
            return self.first_page().await;
        }

        let Some(page_count) = self.page_count else {
            self.finished = true;
            return Ok(());
        };
        if self.next_page > page_count {
            self.finished = true;
            return Ok(());
        }

        let target = self.next_page;
        log::info!("moving to page {target} / {page_count}");
        let page = self.reach_page(target).await?;
        let parsed = parse_results(&page, &self.layout)?;
        self.buffer.extend(parsed.references);
        self.next_page += 1;
        if self.next_page > page_count {
            self.finished = true;
        }
        Ok(())
    }

    async fn first_page(&mut self) -> Result<(), ListingError> {
        let page = self.search().await?;
        let parsed = parse_results(&page, &self.layout)?;
        self.buffer.extend(parsed.references);

        match parsed.count {
            Ok(count) => {
                let pages = count.div_ceil(self.layout.page_size);
                log::info!("{count} results over {pages} page(s)");
                self.page_count = Some(pages);
                if pages < 2 {
                    self.finished = true;
                }
            }
            Err(err) => {
                self.deferred = Some(err);
                self.finished = true;
            }
        }
        Ok(())
    }

    /// Replay the search, then jump through page links until `target`.
    async fn reach_page(&mut self, target: usize) -> Result<PageResponse, ListingError> {
        let mut current = self.search().await?;
        let mut reached = 1usize;

        for _ in 0..target {
            let links = page_links(&current);
            let Some((&best, url)) = links.range(..=target).next_back() else {
                break;
            };
            if best <= reached {
                break;
            }

            log::debug!("page {target}: via page {best}");
            current = self
                .session
                .request(url.clone(), RequestOptions::get(Credentials::Include))
                .await?;
            reached = best;
            if reached == target {
                return Ok(current);
            }
        }

        if let Some(message) = error_banner(&current, &self.layout)? {
            return Err(ListingError::SearchRejected(message));
        }
        Err(ListingError::PaginationLoop { target, reached })
    }

    async fn search(&mut self) -> Result<PageResponse, ListingError> {
        let menu = match self.menu.take() {
            Some(menu) => menu,
            None => fetch_menu(&self.session).await?,
        };
        let dispatched = dispatch(&self.session, &menu, &self.layout.flow_name).await;
        self.menu = Some(menu);

        let page = dispatched?;
        let form = search_form(&page, &self.layout, &self.query)?;
        let (url, options) = form.submission(page.url(), Credentials::Include)?;
        let result = self.session.request(url, options).await?;
        self.replays += 1;
        Ok(result)
    }
}

fn search_form(page: &PageResponse, layout: &ListingLayout, query: &SearchQuery) -> Result<FormSnapshot, ListingError> {
    let document = Html::parse_document(page.text());
    let form = FormSnapshot::by_selector(&document, &layout.search_form_selector)?.ok_or_else(|| {
        ListingError::SearchFormNotFound {
            url: page.url().clone(),
        }
    })?;

    let page_size = layout.page_size.to_string();
    let size_patch = match form.field(&layout.page_size_field) {
        Some(field) if matches!(field.kind, FieldKind::Select { .. }) => {
            FieldPatch::option_label(&layout.page_size_field, &page_size)
        }
        _ => FieldPatch::value(&layout.page_size_field, &page_size),
    };

    let mut patches: Vec<FieldPatch> = query
        .criteria()
        .iter()
        .map(|(field, label)| FieldPatch::option_label(field, label))
        .collect();
    patches.push(size_patch);
    Ok(form.apply(&patches)?)
}

/// First non-empty error banner on the page, if any.
fn error_banner(page: &PageResponse, layout: &ListingLayout) -> Result<Option<String>, ListingError> {
    banner_text(&Html::parse_document(page.text()), layout)
}

fn banner_text(document: &Html, layout: &ListingLayout) -> Result<Option<String>, ListingError> {
    Ok(texts_matching(document, &layout.error_selector)?
        .into_iter()
        .find(|text| !text.is_empty()))
}

fn parse_results(page: &PageResponse, layout: &ListingLayout) -> Result<ResultPage, ListingError> {
    let document = Html::parse_document(page.text());
    let table_selector = compile_selector(&layout.table_selector)?;

    let Some(table) = document.select(&table_selector).next() else {
        return Err(match banner_text(&document, layout)? {
            Some(message) => ListingError::SearchRejected(message),
            None => ListingError::TableNotFound {
                url: page.url().clone(),
            },
        });
    };

    let headers = table_headers(table);
    let row_selector = compile_selector("tr")?;
    let rows: Vec<ElementRef<'_>> = table
        .select(&row_selector)
        .filter(|row| cells(*row).any(|cell| cell.value().name() == "td"))
        .collect();

    let mut references = Vec::with_capacity(rows.len());
    if !rows.is_empty() {
        let input_form = FormSnapshot::by_selector(&document, &layout.input_form_selector)?.ok_or_else(|| {
            ListingError::InputFormNotFound {
                url: page.url().clone(),
            }
        })?;
        let url = input_form.resolve_action(page.url())?;
        let init_form = input_form.to_pairs();
        let method = input_form.method.as_str().to_string();

        for (index, row) in rows.into_iter().enumerate() {
            let mut digest = Vec::new();
            let mut options = None;
            let mut handler = String::new();

            for (header, cell) in headers.iter().zip(cells(row)) {
                if *header == layout.reference_column {
                    handler = onclick_within(cell).unwrap_or_default();
                    options = InlineCall::parse_named(&handler, &layout.reference_handler)
                        .as_ref()
                        .and_then(RoutingOptions::from_call);
                } else {
                    digest.push((header.clone(), text_of(cell).trim().to_string()));
                }
            }

            let options = options.ok_or(ListingError::RowHandlerMismatch { row: index, handler })?;
            references.push(ListingReference {
                init_form: init_form.clone(),
                digest,
                method: method.clone(),
                url: url.clone(),
                options,
            });
        }
    }

    Ok(ResultPage {
        references,
        count: result_count(&document, layout, page.url()),
    })
}

fn cells<'a>(row: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
}

fn table_headers(table: ElementRef<'_>) -> Vec<String> {
    let header_row = Selector::parse("thead tr")
        .ok()
        .and_then(|sel| table.select(&sel).next())
        .or_else(|| {
            let rows = Selector::parse("tr").ok()?;
            table
                .select(&rows)
                .find(|row| cells(*row).all(|cell| cell.value().name() == "th"))
        });
    header_row
        .map(|row| cells(row).map(squeezed_text).collect())
        .unwrap_or_default()
}

fn onclick_within(cell: ElementRef<'_>) -> Option<String> {
    std::iter::once(cell)
        .chain(cell.descendants().filter_map(ElementRef::wrap))
        .find_map(|el| el.value().attr("onclick"))
        .map(|onclick| onclick.trim().to_string())
}

fn result_count(document: &Html, layout: &ListingLayout, url: &Url) -> Result<usize, ListingError> {
    let unparseable = || ListingError::ResultCountUnparseable { url: url.clone() };
    let text = document
        .root_element()
        .text()
        .find(|text| text.contains(&layout.count_marker))
        .ok_or_else(unparseable)?;
    let after = text
        .split_once(&layout.count_prefix)
        .map(|(_, rest)| rest)
        .ok_or_else(unparseable)?;
    let number = after
        .split_once(&layout.count_suffix)
        .map(|(n, _)| n)
        .ok_or_else(unparseable)?;
    number
        .trim()
        .replace(',', "")
        .parse()
        .map_err(|_| unparseable())
}

/// Numbered page links on a result page, resolved against that page.
fn page_links(page: &PageResponse) -> BTreeMap<usize, Url> {
    let document = Html::parse_document(page.text());
    let Ok(anchors) = Selector::parse("a[href]") else {
        return BTreeMap::new();
    };
    document
        .select(&anchors)
        .filter_map(|a| {
            let number = text_of(a).trim().parse::<usize>().ok()?;
            let href = a.value().attr("href")?;
            let url = page.url().join(href).ok()?;
            Some((number, url))
        })
        .collect()
}
