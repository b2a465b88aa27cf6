//! Flow dispatch through the application's frame menu.
//!
//! CampusSquare pages are reached by posting a flow identifier through the
//! menu frame's `linkForm`. Identifiers are not stable across deployments, so
//! they are looked up by the human-readable entry name every time.

use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use super::dom::compile_selector;
use super::form::{FormError, FormSnapshot};
use super::handler::InlineCall;
use crate::config::SiteConfig;
use crate::session::Session;
use crate::transport::{Credentials, PageResponse, PipelineError, RequestOptions};

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("expected to be on {expected}, landed on {found}; log in first")]
    WrongHost { expected: String, found: String },
    #[error("no menu frame on {url}")]
    MenuFrameNotFound { url: Url },
    #[error("menu has no entry named '{0}'")]
    FlowNotFound(String),
    #[error("menu page {url} has no link form")]
    LinkFormNotFound { url: Url },
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// The parsed menu frame of an authenticated session.
#[derive(Debug, Clone)]
pub struct MenuHandle {
    url: Url,
    html: String,
}

impl MenuHandle {
    pub fn new(url: Url, html: String) -> Self {
        Self { url, html }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// Flow identifier of the entry titled `name`, read from the first
    /// `handler(...)` call found on the entry or one of its ancestors.
    pub fn flow_id(&self, name: &str, handler: &str) -> Option<String> {
        let document = Html::parse_document(&self.html);
        let titled = Selector::parse("[title]").ok()?;

        document
            .select(&titled)
            .filter(|el| el.value().attr("title") == Some(name))
            .find_map(|el| {
                std::iter::once(el)
                    .chain(el.ancestors().filter_map(scraper::ElementRef::wrap))
                    .filter_map(|node| node.value().attr("onclick"))
                    .find_map(|onclick| InlineCall::parse_named(onclick, handler))
                    .and_then(|call| call.arg(0).map(str::to_string))
            })
    }

    fn link_form(&self, site: &SiteConfig) -> Option<FormSnapshot> {
        let document = Html::parse_document(&self.html);
        FormSnapshot::by_name(&document, &site.link_form_name)
    }
}

/// Load the frame page from the entry URL and follow it to the menu frame.
pub async fn fetch_menu(session: &Session) -> Result<MenuHandle, NavigationError> {
    let site = &session.config().site;
    let frame = session
        .request(site.entry_url.clone(), RequestOptions::get(Credentials::Include))
        .await?;

    let host = frame.host().unwrap_or_default();
    if host != site.app_host {
        return Err(NavigationError::WrongHost {
            expected: site.app_host.clone(),
            found: host.to_string(),
        });
    }

    let menu_url = menu_frame_url(&frame, &site.menu_frame_selector)?;
    log::debug!("menu frame at {menu_url}");
    let menu = session
        .request(menu_url, RequestOptions::get(Credentials::Include))
        .await?;
    let url = menu.url().clone();
    Ok(MenuHandle::new(url, menu.into_text()))
}

/// Open the flow behind the menu entry titled `flow_name`.
pub async fn dispatch(
    session: &Session,
    menu: &MenuHandle,
    flow_name: &str,
) -> Result<PageResponse, NavigationError> {
    let site = &session.config().site;
    let flow_id = menu
        .flow_id(flow_name, &site.flow_handler)
        .ok_or_else(|| NavigationError::FlowNotFound(flow_name.to_string()))?;
    log::info!("{flow_name} -> {flow_id}");

    let form = menu
        .link_form(site)
        .ok_or_else(|| NavigationError::LinkFormNotFound {
            url: menu.url().clone(),
        })?
        .with_value(&site.flow_id_field, &flow_id);
    let (url, options) = form.submission(menu.url(), Credentials::Include)?;
    Ok(session.request(url, options).await?)
}

fn menu_frame_url(frame: &PageResponse, selector: &str) -> Result<Url, NavigationError> {
    let document = Html::parse_document(frame.text());
    let selector = compile_selector(selector)?;
    let src = document
        .select(&selector)
        .find_map(|el| el.value().attr("src"))
        .ok_or_else(|| NavigationError::MenuFrameNotFound {
            url: frame.url().clone(),
        })?;
    frame.url().join(src).map_err(|_| {
        NavigationError::Pipeline(PipelineError::InvalidUrl {
            base: frame.url().clone(),
            reference: src.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MENU: &str = r#"
        <html><body>
        <ul>
          <li><a href="javascript:void(0)" onclick="moveFunc('SYW0001000-flow', 1); return false;">
                <span title="シラバス参照">シラバス参照</span></a></li>
          <li><a onclick="moveFunc('KHW0001100-flow', 2)"><span title="履修登録・登録状況照会">履修登録</span></a></li>
          <li><span title="お知らせ">お知らせ</span></li>
        </ul>
        <form name="linkForm" action="/campusweb/campussquare.do" method="post">
          <input type="hidden" name="_flowId" value="">
        </form>
        </body></html>
    "#;

    fn menu() -> MenuHandle {
        MenuHandle::new(
            Url::parse("https://campus.example/campusweb/portal.do?page=menu").unwrap(),
            MENU.to_string(),
        )
    }

    #[test]
    fn resolves_flow_ids_by_title() {
        let menu = menu();
        assert_eq!(menu.flow_id("シラバス参照", "moveFunc").as_deref(), Some("SYW0001000-flow"));
        assert_eq!(
            menu.flow_id("履修登録・登録状況照会", "moveFunc").as_deref(),
            Some("KHW0001100-flow")
        );
        assert_eq!(menu.flow_id("お知らせ", "moveFunc"), None);
        assert_eq!(menu.flow_id("存在しない", "moveFunc"), None);
    }

    #[test]
    fn link_form_is_found_by_name() {
        let form = menu().link_form(&SiteConfig::default()).unwrap();
        let form = form.with_value("_flowId", "SYW0001000-flow");
        assert_eq!(form.to_pairs(), vec![("_flowId".to_string(), "SYW0001000-flow".to_string())]);
    }
}
