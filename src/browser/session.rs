use std::collections::BTreeMap;
use std::time::Duration;

use ai_agent::ToolExecutionError;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use tracing::{debug, info};

use super::page::{ElementKind, FormMethod, InteractiveElement, Page};
use crate::settings::BrowserConfig;

/// One browsing context over plain HTTP: the current page plus form values
/// staged by `input_text` and not yet submitted.
pub struct PageSession {
    http: Client,
    config: BrowserConfig,
    current: Option<Page>,
    staged: BTreeMap<usize, BTreeMap<String, String>>,
}

impl PageSession {
    pub fn new(config: BrowserConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            config,
            current: None,
            staged: BTreeMap::new(),
        })
    }

    pub fn current(&self) -> Result<&Page, ToolExecutionError> {
        self.current
            .as_ref()
            .ok_or_else(|| ToolExecutionError::permanent("no page is open; navigate to a URL first"))
    }

    #[cfg(test)]
    pub fn staged_for(&self, form: usize) -> Option<&BTreeMap<String, String>> {
        self.staged.get(&form)
    }

    pub async fn open(&mut self, target: &str) -> Result<&Page, ToolExecutionError> {
        let url = parse_target(target)?;
        info!(url = %url, "navigating");
        let request = self.http.get(url);
        self.load(request).await
    }

    pub async fn search(&mut self, query: &str) -> Result<&Page, ToolExecutionError> {
        let url = Url::parse_with_params(&self.config.search_url, &[("q", query)]).map_err(|err| {
            ToolExecutionError::permanent(format!("search URL is misconfigured: {err}"))
        })?;
        info!(query, "searching");
        let request = self.http.get(url);
        self.load(request).await
    }

    /// Follows a link. Anything that would submit a form is refused here so
    /// submissions always go through `submit_form`.
    pub async fn click(&mut self, element_id: usize) -> Result<&Page, ToolExecutionError> {
        let element = self.element(element_id)?.clone();
        match (&element.kind, &element.href) {
            (ElementKind::Link, Some(href)) => {
                info!(element_id, href = %href, "following link");
                let request = self.http.get(href.as_str());
                self.load(request).await
            }
            _ if element.submits_form() => Err(ToolExecutionError::permanent(format!(
                "element {element_id} submits a form; use submit_form instead"
            ))),
            _ => Err(ToolExecutionError::permanent(format!(
                "element {element_id} ({}) has no action without scripts",
                element.label
            ))),
        }
    }

    pub fn stage_input(
        &mut self,
        element_id: usize,
        text: &str,
    ) -> Result<InteractiveElement, ToolExecutionError> {
        let element = self.element(element_id)?.clone();
        if !element.accepts_text() {
            return Err(ToolExecutionError::permanent(format!(
                "element {element_id} ({}) does not accept text",
                element.label
            )));
        }
        let (Some(form), Some(name)) = (element.form, element.name.clone()) else {
            return Err(ToolExecutionError::permanent(format!(
                "element {element_id} is not a named field of a form"
            )));
        };
        debug!(element_id, form, field = %name, "staging form value");
        self.staged
            .entry(form)
            .or_default()
            .insert(name, text.to_string());
        Ok(element)
    }

    /// Submits the form that `element_id` belongs to with its staged values.
    pub async fn submit(&mut self, element_id: usize) -> Result<&Page, ToolExecutionError> {
        let element = self.element(element_id)?;
        let index = element.form.ok_or_else(|| {
            ToolExecutionError::permanent(format!("element {element_id} is not part of a form"))
        })?;
        let form = self
            .current()?
            .forms
            .get(index)
            .cloned()
            .ok_or_else(|| ToolExecutionError::permanent(format!("form {index} is gone")))?;
        let staged = self.staged.get(&index).cloned().unwrap_or_default();
        let pairs = form.submission(&staged);

        info!(action = %form.action, method = ?form.method, fields = pairs.len(), "submitting form");
        let request = match form.method {
            FormMethod::Get => self.http.get(form.action.as_str()).query(&pairs),
            FormMethod::Post => self.http.post(form.action.as_str()).form(&pairs),
        };
        self.load(request).await
    }

    pub fn element(&self, element_id: usize) -> Result<&InteractiveElement, ToolExecutionError> {
        let page = self.current()?;
        page.element(element_id).ok_or_else(|| {
            ToolExecutionError::permanent(format!(
                "no element {element_id} on {}; list the interactive elements again",
                page.url
            ))
        })
    }

    async fn load(&mut self, request: RequestBuilder) -> Result<&Page, ToolExecutionError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        let url = response.url().clone();
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(true, |value| value.contains("html"));
        let body = response.text().await.map_err(classify_transport)?;

        let page = if is_html {
            Page::parse(url, status.as_u16(), &body, &self.config)
        } else {
            Page::plain(url, status.as_u16(), &body, &self.config)
        };
        debug!(url = %page.url, status = page.status, elements = page.elements.len(), "page loaded");
        self.staged.clear();
        let page: &Page = self.current.insert(page);
        Ok(page)
    }
}

fn parse_target(target: &str) -> Result<Url, ToolExecutionError> {
    let target = target.trim();
    let candidate = if target.contains("://") {
        target.to_string()
    } else {
        format!("https://{target}")
    };
    let url = Url::parse(&candidate)
        .map_err(|err| ToolExecutionError::permanent(format!("invalid URL `{target}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ToolExecutionError::permanent(format!(
            "unsupported URL scheme `{other}`"
        ))),
    }
}

fn classify_transport(err: reqwest::Error) -> ToolExecutionError {
    if err.is_builder() || err.is_redirect() {
        ToolExecutionError::permanent(err.to_string())
    } else {
        ToolExecutionError::transient(err.to_string())
    }
}

fn classify_status(status: StatusCode) -> Option<ToolExecutionError> {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Some(ToolExecutionError::transient(format!("server answered {status}")))
    } else if status.is_client_error() {
        Some(ToolExecutionError::permanent(format!("server answered {status}")))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_agent::FailureKind;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LANDING: &str = r#"<html><head><title>Library</title></head><body>
        <a href="/hours">Opening hours</a>
        <form action="/account" method="post">
          <input type="email" name="email" value="old@example.com">
          <button type="submit">Update</button>
        </form>
        <button type="button">Menu</button>
    </body></html>"#;

    fn session(server: &MockServer) -> PageSession {
        PageSession::new(BrowserConfig {
            search_url: format!("{}/search", server.uri()),
            request_timeout_secs: 2,
            ..BrowserConfig::default()
        })
        .unwrap()
    }

    async fn mount_landing(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(LANDING, "text/html; charset=utf-8"),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn targets_without_scheme_default_to_https() {
        assert_eq!(
            parse_target("example.com/path").unwrap().as_str(),
            "https://example.com/path"
        );
        assert_eq!(
            parse_target("ftp://example.com").unwrap_err().kind(),
            FailureKind::Permanent
        );
    }

    #[test]
    fn status_codes_are_classified() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE).map(|e| e.kind()),
            Some(FailureKind::Transient)
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS).map(|e| e.kind()),
            Some(FailureKind::Transient)
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND).map(|e| e.kind()),
            Some(FailureKind::Permanent)
        );
    }

    #[tokio::test]
    async fn follows_links_and_refuses_submit_clicks() {
        let server = MockServer::start().await;
        mount_landing(&server).await;
        Mock::given(method("GET"))
            .and(path("/hours"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<title>Hours</title><body>Open 9 to 5</body>", "text/html"),
            )
            .mount(&server)
            .await;

        let mut session = session(&server);
        let page = session.open(&server.uri()).await.unwrap();
        assert_eq!(page.title.as_deref(), Some("Library"));

        let err = session.click(3).await.unwrap_err();
        assert!(err.message().contains("submit_form"));
        let err = session.click(4).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Permanent);

        let page = session.click(1).await.unwrap();
        assert_eq!(page.title.as_deref(), Some("Hours"));
        assert_eq!(page.text, "Open 9 to 5");
    }

    #[tokio::test]
    async fn staged_values_are_posted_on_submit() {
        let server = MockServer::start().await;
        mount_landing(&server).await;
        Mock::given(method("POST"))
            .and(path("/account"))
            .and(body_string_contains("email=new%40example.com"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<title>Saved</title>", "text/html"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut session = session(&server);
        session.open(&server.uri()).await.unwrap();
        session.stage_input(2, "new@example.com").unwrap();
        assert_eq!(
            session.staged_for(0).and_then(|f| f.get("email")).map(String::as_str),
            Some("new@example.com")
        );

        let page = session.submit(3).await.unwrap();
        assert_eq!(page.title.as_deref(), Some("Saved"));
        assert!(session.staged_for(0).is_none());
    }

    #[tokio::test]
    async fn search_sends_the_query_and_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "rust books"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut session = session(&server);
        let err = session.search("rust books").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);

        let err = session.click(1).await.unwrap_err();
        assert!(err.message().contains("no page is open"));
    }
}
