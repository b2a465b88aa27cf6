//! Login handshake against the Shibboleth identity provider.
//!
//! The handshake is a fixed sequence of page transitions, each verified
//! before the next form is submitted:
//!
//! ```text
//! AnonymousProbe -> IdentityRedirect -> CredentialsSubmitted
//!     -> [StepUpChallenge] -> AssertionContinuation -> Authenticated
//! ```
//!
//! Any unexpected page ends the attempt with an [`AuthError`]; nothing is
//! retried at this level.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use scraper::Html;
use thiserror::Error;
use url::Url;

use super::dom::texts_matching;
use super::form::{FormError, FormSnapshot};
use crate::config::{LoginCredentials, SiteConfig};
use crate::session::Session;
use crate::transport::{Credentials, PageResponse, PipelineError, RequestOptions};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("expected a redirect to {expected}, landed on {found} ({url})")]
    UnexpectedRedirect { expected: String, found: String, url: Url },
    #[error("no unnamed login form on {url}")]
    LoginFormNotFound { url: Url },
    #[error("{count} unnamed forms on {url}, cannot tell which one logs in")]
    AmbiguousLoginForm { url: Url, count: usize },
    #[error("identity provider rejected the credentials: {}", .0.join(", "))]
    InvalidCredentials(Vec<String>),
    #[error("multi-factor step-up requested but no prompt was supplied")]
    StepUpPromptMissing,
    #[error("no step-up form on {url}")]
    StepUpFormNotFound { url: Url },
    #[error("login flow left the expected path '{expected}' at {url}")]
    LoginFlowBroken { expected: String, url: Url },
    #[error("no continuation form on {url}")]
    ContinuationFormNotFound { url: Url },
    #[error("login finished on {found} instead of {expected}")]
    PostLoginVerificationFailed { expected: String, found: String },
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AnonymousProbe,
    IdentityRedirect,
    CredentialsSubmitted,
    StepUpChallenge,
    AssertionContinuation,
    Authenticated,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::AnonymousProbe => "anonymous-probe",
            AuthState::IdentityRedirect => "identity-redirect",
            AuthState::CredentialsSubmitted => "credentials-submitted",
            AuthState::StepUpChallenge => "step-up-challenge",
            AuthState::AssertionContinuation => "assertion-continuation",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The stored session was still valid; no form was submitted.
    AlreadyAuthenticated,
    Authenticated { step_up: bool },
}

impl LoginOutcome {
    pub fn is_fresh_login(&self) -> bool {
        matches!(self, LoginOutcome::Authenticated { .. })
    }
}

/// Supplies the one-time code for the multi-factor step-up page.
#[async_trait]
pub trait StepUpPrompt: Send + Sync {
    async fn code(&self) -> u32;
}

#[async_trait]
impl<F, Fut> StepUpPrompt for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = u32> + Send + 'static,
{
    async fn code(&self) -> u32 {
        (self)().await
    }
}

/// Request the entry URL; `true` when it lands on the application host.
pub async fn is_logged_in(session: &Session) -> Result<bool, AuthError> {
    let site = &session.config().site;
    let page = visit_entry(session, site).await?;
    Ok(page.host() == Some(site.app_host.as_str()))
}

/// Run the handshake. Idempotent: a still-valid session returns
/// [`LoginOutcome::AlreadyAuthenticated`] after the entry request alone.
pub async fn login(
    session: &Session,
    credentials: &LoginCredentials,
    prompt: Option<&dyn StepUpPrompt>,
) -> Result<LoginOutcome, AuthError> {
    let result = run_handshake(session, credentials, prompt).await;
    if let Err(ref err) = result {
        log::warn!("login {}: {err}", AuthState::Failed);
    }
    result
}

async fn run_handshake(
    session: &Session,
    credentials: &LoginCredentials,
    prompt: Option<&dyn StepUpPrompt>,
) -> Result<LoginOutcome, AuthError> {
    let site = &session.config().site;

    enter(AuthState::AnonymousProbe);
    let landing = visit_entry(session, site).await?;
    let host = landing.host().unwrap_or_default();
    if host == site.app_host {
        log::info!("stored session for {} is still valid", site.app_host);
        return Ok(LoginOutcome::AlreadyAuthenticated);
    }
    if host != site.identity_host {
        return Err(AuthError::UnexpectedRedirect {
            expected: site.identity_host.clone(),
            found: host.to_string(),
            url: landing.url().clone(),
        });
    }

    enter(AuthState::IdentityRedirect);
    let mut page = landing;
    let interstitial = {
        let document = Html::parse_document(page.text());
        FormSnapshot::by_name(&document, &site.interstitial_form)
    };
    if let Some(form) = interstitial {
        log::debug!("passing identity provider interstitial on {}", page.url());
        page = submit(session, &form, &page).await?;
    }

    enter(AuthState::CredentialsSubmitted);
    let login_form = login_form(&page)?
        .with_value(&site.username_field, &credentials.username)
        .with_value(&site.password_field, &credentials.password);
    page = submit(session, &login_form, &page).await?;

    let errors = login_errors(&page, &site.login_error_selector)?;
    if !errors.is_empty() {
        return Err(AuthError::InvalidCredentials(errors));
    }

    let mut step_up = false;
    if page.url().as_str().contains(&site.step_up_path) {
        enter(AuthState::StepUpChallenge);
        let prompt = prompt.ok_or(AuthError::StepUpPromptMissing)?;
        let form = {
            let document = Html::parse_document(page.text());
            FormSnapshot::first(&document)
        }
        .ok_or_else(|| AuthError::StepUpFormNotFound {
            url: page.url().clone(),
        })?;

        let code = prompt.code().await;
        let form = form
            .with_value(&site.step_up_code_field, &code.to_string())
            .with_submitter(&site.step_up_submitter);
        page = submit(session, &form, &page).await?;
        step_up = true;
    }

    if !page.url().as_str().contains(&site.assertion_path) {
        return Err(AuthError::LoginFlowBroken {
            expected: site.assertion_path.clone(),
            url: page.url().clone(),
        });
    }
    enter(AuthState::AssertionContinuation);
    let continuation = {
        let document = Html::parse_document(page.text());
        FormSnapshot::first(&document)
    }
    .ok_or_else(|| AuthError::ContinuationFormNotFound {
        url: page.url().clone(),
    })?;
    page = submit(session, &continuation, &page).await?;

    let host = page.host().unwrap_or_default();
    if host != site.app_host {
        return Err(AuthError::PostLoginVerificationFailed {
            expected: site.app_host.clone(),
            found: host.to_string(),
        });
    }

    enter(AuthState::Authenticated);
    Ok(LoginOutcome::Authenticated { step_up })
}

fn enter(state: AuthState) {
    log::info!("login state: {state}");
}

async fn visit_entry(session: &Session, site: &SiteConfig) -> Result<PageResponse, AuthError> {
    Ok(session
        .request(site.entry_url.clone(), RequestOptions::get(Credentials::Include))
        .await?)
}

async fn submit(
    session: &Session,
    form: &FormSnapshot,
    current: &PageResponse,
) -> Result<PageResponse, AuthError> {
    let (url, options) = form.submission(current.url(), Credentials::Include)?;
    Ok(session.request(url, options).await?)
}

/// The one form on the page without a `name` attribute.
fn login_form(page: &PageResponse) -> Result<FormSnapshot, AuthError> {
    let document = Html::parse_document(page.text());
    let mut unnamed: Vec<FormSnapshot> = FormSnapshot::all(&document)
        .into_iter()
        .filter(|form| form.name.is_none())
        .collect();
    match unnamed.len() {
        0 => Err(AuthError::LoginFormNotFound {
            url: page.url().clone(),
        }),
        1 => Ok(unnamed.remove(0)),
        count => Err(AuthError::AmbiguousLoginForm {
            url: page.url().clone(),
            count,
        }),
    }
}

fn login_errors(page: &PageResponse, selector: &str) -> Result<Vec<String>, FormError> {
    let document = Html::parse_document(page.text());
    Ok(texts_matching(&document, selector)?
        .into_iter()
        .filter(|text| !text.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn closures_act_as_step_up_prompts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let prompt = move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                42u32
            }
        };

        let dynamic: &dyn StepUpPrompt = &prompt;
        assert_eq!(dynamic.code().await, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn page(body: &str) -> PageResponse {
        PageResponse::new(
            200,
            Url::parse("https://idp.example/idp/profile/SAML2/Redirect/SSO?execution=e1s2").unwrap(),
            http::HeaderMap::new(),
            body.to_string(),
        )
    }

    #[test]
    fn login_form_is_the_only_unnamed_form() {
        let single = page(
            r#"<form name="lang"><select name="l"></select></form>
               <form action="?execution=e1s3" method="post"><input name="j_username"></form>"#,
        );
        let form = login_form(&single).unwrap();
        assert!(form.field("j_username").is_some());

        let none = page(r#"<form name="lang"></form>"#);
        assert!(matches!(login_form(&none), Err(AuthError::LoginFormNotFound { .. })));

        let two = page(r#"<form action="/a"></form><form action="/b"></form>"#);
        assert!(matches!(
            login_form(&two),
            Err(AuthError::AmbiguousLoginForm { count: 2, .. })
        ));
    }

    #[test]
    fn state_names_and_outcomes() {
        assert_eq!(AuthState::StepUpChallenge.to_string(), "step-up-challenge");
        assert!(LoginOutcome::Authenticated { step_up: false }.is_fresh_login());
        assert!(!LoginOutcome::AlreadyAuthenticated.is_fresh_login());
    }
}
