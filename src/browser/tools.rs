use std::path::PathBuf;
use std::sync::Arc;

use ai_agent::{
    BrowserTool, DangerCategory, ToolDescription, ToolExecutionError, ToolOutput, ToolResult,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::page::{ElementKind, Page};
use super::session::PageSession;
use crate::profile::UserProfile;

pub type SharedSession = Arc<Mutex<PageSession>>;

const SEARCH_RESULT_LINKS: usize = 10;

/// Every tool the command-line agent registers, sharing one page session.
pub fn toolset(session: SharedSession, profile: Option<PathBuf>) -> Vec<Arc<dyn BrowserTool>> {
    vec![
        Arc::new(NavigateTool::new(session.clone())),
        Arc::new(SearchTool::new(session.clone())),
        Arc::new(ElementsTool::new(session.clone())),
        Arc::new(ElementContextTool::new(session.clone())),
        Arc::new(ClickTool::new(session.clone())),
        Arc::new(InputTool::new(session.clone())),
        Arc::new(SubmitTool::new(session)),
        Arc::new(PreferenceTool::new(profile)),
    ]
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolExecutionError> {
    serde_json::from_value(args)
        .map_err(|err| ToolExecutionError::permanent(format!("invalid arguments for {tool}: {err}")))
}

fn page_output(page: &Page) -> ToolOutput {
    let mut output = ToolOutput::new(page.summary());
    output
        .metadata
        .insert("url".into(), Value::String(page.url.to_string()));
    output
}

fn element_schema() -> Value {
    json!({
        "type": "object",
        "required": ["element_id"],
        "properties": {
            "element_id": { "type": "integer", "minimum": 1 }
        },
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct ElementArgs {
    element_id: usize,
}

pub struct NavigateTool {
    description: ToolDescription,
    session: SharedSession,
}

impl NavigateTool {
    pub fn new(session: SharedSession) -> Self {
        Self {
            description: ToolDescription::new(
                "navigate_to_url",
                "Open a web page and return its title and visible text.",
                json!({
                    "type": "object",
                    "required": ["url"],
                    "properties": { "url": { "type": "string", "minLength": 1 } },
                    "additionalProperties": false
                }),
                DangerCategory::None,
            ),
            session,
        }
    }
}

#[derive(Deserialize)]
struct NavigateArgs {
    url: String,
}

#[async_trait]
impl BrowserTool for NavigateTool {
    fn description(&self) -> &ToolDescription {
        &self.description
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let args: NavigateArgs = parse_args(&self.description.name, args)?;
        let mut session = self.session.lock().await;
        let page = session.open(&args.url).await?;
        Ok(page_output(page))
    }
}

pub struct SearchTool {
    description: ToolDescription,
    session: SharedSession,
}

impl SearchTool {
    pub fn new(session: SharedSession) -> Self {
        Self {
            description: ToolDescription::new(
                "search_web",
                "Search the web and return the result page with its top links.",
                json!({
                    "type": "object",
                    "required": ["query"],
                    "properties": { "query": { "type": "string", "minLength": 1 } },
                    "additionalProperties": false
                }),
                DangerCategory::None,
            ),
            session,
        }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[async_trait]
impl BrowserTool for SearchTool {
    fn description(&self) -> &ToolDescription {
        &self.description
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let args: SearchArgs = parse_args(&self.description.name, args)?;
        let mut session = self.session.lock().await;
        let page = session.search(&args.query).await?;
        let links: Vec<_> = page
            .elements
            .iter()
            .filter(|element| element.kind == ElementKind::Link)
            .take(SEARCH_RESULT_LINKS)
            .collect();
        let mut output = page_output(page);
        output
            .metadata
            .insert("query".into(), Value::String(args.query.clone()));
        if let Value::Object(content) = &mut output.content {
            content.insert("links".into(), json!(links));
        }
        Ok(output)
    }
}

pub struct ElementsTool {
    description: ToolDescription,
    session: SharedSession,
}

impl ElementsTool {
    pub fn new(session: SharedSession) -> Self {
        Self {
            description: ToolDescription::new(
                "get_interactive_elements",
                "List the links, buttons and form fields on the current page with their ids.",
                json!({ "type": "object", "properties": {}, "additionalProperties": false }),
                DangerCategory::None,
            ),
            session,
        }
    }
}

#[async_trait]
impl BrowserTool for ElementsTool {
    fn description(&self) -> &ToolDescription {
        &self.description
    }

    async fn invoke(&self, _args: Value) -> ToolResult {
        let session = self.session.lock().await;
        let page = session.current()?;
        Ok(ToolOutput::new(json!({
            "url": page.url.as_str(),
            "elements": page.elements,
            "forms": page.forms,
        })))
    }
}

pub struct ElementContextTool {
    description: ToolDescription,
    session: SharedSession,
}

impl ElementContextTool {
    pub fn new(session: SharedSession) -> Self {
        Self {
            description: ToolDescription::new(
                "get_element_context",
                "Describe the elements around an element id, up to the nearest heading or text.",
                element_schema(),
                DangerCategory::None,
            ),
            session,
        }
    }
}

#[async_trait]
impl BrowserTool for ElementContextTool {
    fn description(&self) -> &ToolDescription {
        &self.description
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let args: ElementArgs = parse_args(&self.description.name, args)?;
        let session = self.session.lock().await;
        let element = session.element(args.element_id)?;
        Ok(ToolOutput::new(json!({
            "element": element,
            "ancestors": element.context,
        })))
    }
}

pub struct ClickTool {
    description: ToolDescription,
    session: SharedSession,
}

impl ClickTool {
    pub fn new(session: SharedSession) -> Self {
        Self {
            description: ToolDescription::new(
                "click_element",
                "Follow a link by its element id. Use submit_form for form buttons.",
                element_schema(),
                DangerCategory::None,
            ),
            session,
        }
    }
}

#[async_trait]
impl BrowserTool for ClickTool {
    fn description(&self) -> &ToolDescription {
        &self.description
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let args: ElementArgs = parse_args(&self.description.name, args)?;
        let mut session = self.session.lock().await;
        let page = session.click(args.element_id).await?;
        Ok(page_output(page))
    }
}

pub struct InputTool {
    description: ToolDescription,
    session: SharedSession,
}

impl InputTool {
    pub fn new(session: SharedSession) -> Self {
        Self {
            description: ToolDescription::new(
                "input_text",
                "Type text into a form field. Nothing is sent until submit_form.",
                json!({
                    "type": "object",
                    "required": ["element_id", "text"],
                    "properties": {
                        "element_id": { "type": "integer", "minimum": 1 },
                        "text": { "type": "string" }
                    },
                    "additionalProperties": false
                }),
                DangerCategory::None,
            ),
            session,
        }
    }
}

#[derive(Deserialize)]
struct InputArgs {
    element_id: usize,
    text: String,
}

#[async_trait]
impl BrowserTool for InputTool {
    fn description(&self) -> &ToolDescription {
        &self.description
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let args: InputArgs = parse_args(&self.description.name, args)?;
        let mut session = self.session.lock().await;
        let element = session.stage_input(args.element_id, &args.text)?;
        Ok(ToolOutput::new(json!({
            "element_id": element.id,
            "field": element.name,
            "form": element.form,
            "staged": true,
        })))
    }
}

pub struct SubmitTool {
    description: ToolDescription,
    session: SharedSession,
}

impl SubmitTool {
    pub fn new(session: SharedSession) -> Self {
        Self {
            description: ToolDescription::new(
                "submit_form",
                "Submit the form containing the given element, sending any typed values.",
                element_schema(),
                DangerCategory::AccountModifying,
            ),
            session,
        }
    }
}

#[async_trait]
impl BrowserTool for SubmitTool {
    fn description(&self) -> &ToolDescription {
        &self.description
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let args: ElementArgs = parse_args(&self.description.name, args)?;
        let mut session = self.session.lock().await;
        let page = session.submit(args.element_id).await?;
        Ok(page_output(page))
    }
}

pub struct PreferenceTool {
    description: ToolDescription,
    profile: Option<PathBuf>,
}

impl PreferenceTool {
    pub fn new(profile: Option<PathBuf>) -> Self {
        Self {
            description: ToolDescription::new(
                "get_user_preference",
                "Read a saved user detail such as email, phone, address or a contact's number.",
                json!({
                    "type": "object",
                    "required": ["key"],
                    "properties": { "key": { "type": "string", "minLength": 1 } },
                    "additionalProperties": false
                }),
                DangerCategory::None,
            ),
            profile,
        }
    }
}

#[derive(Deserialize)]
struct PreferenceArgs {
    key: String,
}

#[async_trait]
impl BrowserTool for PreferenceTool {
    fn description(&self) -> &ToolDescription {
        &self.description
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let args: PreferenceArgs = parse_args(&self.description.name, args)?;
        let profile = match &self.profile {
            Some(path) => UserProfile::load(path)
                .map_err(|err| ToolExecutionError::permanent(format!("{err:#}")))?,
            None => UserProfile::default(),
        };

        let content = match profile.lookup(&args.key) {
            Some(value) => json!({ "key": args.key, "found": true, "value": value }),
            None => json!({
                "key": args.key,
                "found": false,
                "message": format!(
                    "User preference '{}' not found. Ask the user for this information.",
                    args.key
                ),
            }),
        };
        Ok(ToolOutput::new(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::BrowserConfig;
    use ai_agent::{FailureKind, ToolRegistry};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FORM_PAGE: &str = r#"<html><head><title>Newsletter</title></head><body>
        <a href="/privacy">Privacy</a>
        <form action="/subscribe" method="get">
          <input type="email" name="email" placeholder="Your email">
          <button type="submit">Subscribe</button>
        </form>
    </body></html>"#;

    fn registry(server: &MockServer, profile: Option<PathBuf>) -> ToolRegistry {
        let session = PageSession::new(BrowserConfig {
            search_url: format!("{}/search", server.uri()),
            ..BrowserConfig::default()
        })
        .unwrap();
        let mut registry = ToolRegistry::new();
        for tool in toolset(Arc::new(Mutex::new(session)), profile) {
            registry.register(tool).unwrap();
        }
        registry
    }

    async fn call(registry: &ToolRegistry, name: &str, args: Value) -> ToolResult {
        let call = registry.validate_call(name, &args).unwrap();
        call.tool.invoke(call.arguments).await
    }

    #[tokio::test]
    async fn only_submission_is_dangerous() {
        let server = MockServer::start().await;
        let registry = registry(&server, None);
        let dangerous: Vec<_> = registry
            .danger_index()
            .into_iter()
            .filter(|(_, danger)| danger.is_dangerous())
            .collect();
        assert_eq!(
            dangerous,
            vec![("submit_form".to_string(), DangerCategory::AccountModifying)]
        );
        assert!(registry
            .validate_call("click_element", &json!({ "element_id": 0 }))
            .is_err());
    }

    #[tokio::test]
    async fn fills_and_submits_a_form() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(FORM_PAGE, "text/html"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subscribe"))
            .and(query_param("email", "ada@example.com"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<title>Thanks</title><body>You are subscribed.</body>", "text/html"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry(&server, None);
        let opened = call(
            &registry,
            "navigate_to_url",
            json!({ "url": format!("{}/news", server.uri()) }),
        )
        .await
        .unwrap();
        assert_eq!(opened.content["title"], "Newsletter");

        let listed = call(&registry, "get_interactive_elements", json!({}))
            .await
            .unwrap();
        assert_eq!(listed.content["elements"][1]["label"], "Your email");
        assert_eq!(listed.content["elements"][1]["form"], 0);

        let staged = call(
            &registry,
            "input_text",
            json!({ "element_id": 2, "text": "ada@example.com" }),
        )
        .await
        .unwrap();
        assert_eq!(staged.content["field"], "email");

        let submitted = call(&registry, "submit_form", json!({ "element_id": 3 }))
            .await
            .unwrap();
        assert_eq!(submitted.content["title"], "Thanks");
        assert_eq!(submitted.content["text"], "You are subscribed.");
    }

    #[tokio::test]
    async fn search_lists_result_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "city library"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<a href="https://library.example.org">City Library</a>"#,
                "text/html",
            ))
            .mount(&server)
            .await;

        let registry = registry(&server, None);
        let output = call(&registry, "search_web", json!({ "query": "city library" }))
            .await
            .unwrap();
        assert_eq!(output.content["links"][0]["href"], "https://library.example.org/");
        assert_eq!(output.metadata["query"], "city library");
    }

    #[tokio::test]
    async fn element_context_names_the_enclosing_section() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(FORM_PAGE, "text/html"))
            .mount(&server)
            .await;

        let registry = registry(&server, None);
        call(
            &registry,
            "navigate_to_url",
            json!({ "url": format!("{}/news", server.uri()) }),
        )
        .await
        .unwrap();

        let output = call(&registry, "get_element_context", json!({ "element_id": 2 }))
            .await
            .unwrap();
        assert_eq!(output.content["element"]["label"], "Your email");
        let ancestors = output.content["ancestors"].as_array().unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0]["tag"], "form");
        assert_eq!(ancestors[0]["text"], "Subscribe");

        let err = call(&registry, "get_element_context", json!({ "element_id": 9 }))
            .await
            .unwrap_err();
        assert!(err.message().contains("no element 9"));
    }

    #[tokio::test]
    async fn element_tools_need_an_open_page() {
        let server = MockServer::start().await;
        let registry = registry(&server, None);
        let err = call(&registry, "click_element", json!({ "element_id": 1 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Permanent);
    }

    #[tokio::test]
    async fn preferences_come_from_the_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, r#"{ "phone": "+47 555 0199" }"#).unwrap();

        let server = MockServer::start().await;
        let registry = registry(&server, Some(path));
        let found = call(&registry, "get_user_preference", json!({ "key": "phone" }))
            .await
            .unwrap();
        assert_eq!(found.content["value"], "+47 555 0199");

        let missing = call(&registry, "get_user_preference", json!({ "key": "address" }))
            .await
            .unwrap();
        assert_eq!(missing.content["found"], false);
        assert!(missing.content["message"]
            .as_str()
            .unwrap()
            .contains("User preference 'address' not found"));
    }
}
