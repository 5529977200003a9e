use std::collections::BTreeMap;

use reqwest::Url;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use serde_json::{json, Value};

use crate::settings::BrowserConfig;

const LABEL_CHARS: usize = 80;
const CONTEXT_CHARS: usize = 200;
const CONTEXT_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Link,
    Button,
    Input,
    TextArea,
    Select,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractiveElement {
    pub id: usize,
    pub kind: ElementKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<usize>,
    /// Enclosing elements, nearest first. Served by `get_element_context`.
    #[serde(skip)]
    pub context: Vec<AncestorSummary>,
}

/// One enclosing element of an interactive element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AncestorSummary {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl InteractiveElement {
    /// Buttons and submit inputs that would send their form.
    pub fn submits_form(&self) -> bool {
        if self.form.is_none() {
            return false;
        }
        match self.kind {
            ElementKind::Button => !matches!(self.input_type.as_deref(), Some("button" | "reset")),
            ElementKind::Input => matches!(self.input_type.as_deref(), Some("submit" | "image")),
            _ => false,
        }
    }

    pub fn accepts_text(&self) -> bool {
        match self.kind {
            ElementKind::TextArea | ElementKind::Select => true,
            ElementKind::Input => !matches!(
                self.input_type.as_deref(),
                Some("submit" | "image" | "button" | "reset" | "checkbox" | "radio" | "file")
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Form {
    pub index: usize,
    pub action: String,
    pub method: FormMethod,
    #[serde(skip)]
    pub fields: Vec<(String, String)>,
}

impl Form {
    /// Default field values with `staged` values laid over them.
    pub fn submission(&self, staged: &BTreeMap<String, String>) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .fields
            .iter()
            .map(|(name, value)| {
                let value = staged.get(name).cloned().unwrap_or_else(|| value.clone());
                (name.clone(), value)
            })
            .collect();
        for (name, value) in staged {
            if !self.fields.iter().any(|(field, _)| field == name) {
                pairs.push((name.clone(), value.clone()));
            }
        }
        pairs
    }
}

/// A fetched document reduced to what the model can act on.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub status: u16,
    pub title: Option<String>,
    pub text: String,
    pub elements: Vec<InteractiveElement>,
    pub forms: Vec<Form>,
}

impl Page {
    pub fn parse(url: Url, status: u16, html: &str, config: &BrowserConfig) -> Self {
        let document = Html::parse_document(html);

        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .map(|el| normalize(el.text()))
            .filter(|title| !title.is_empty());

        let text = Selector::parse("body")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .map(visible_text)
            .unwrap_or_default();

        let (forms, form_nodes) = collect_forms(&document, &url);
        let elements = collect_elements(&document, &url, &form_nodes, config.max_elements);

        Self {
            url,
            status,
            title,
            text: truncate(&text, config.max_text_chars),
            elements,
            forms,
        }
    }

    pub fn plain(url: Url, status: u16, body: &str, config: &BrowserConfig) -> Self {
        Self {
            url,
            status,
            title: None,
            text: truncate(&normalize(std::iter::once(body)), config.max_text_chars),
            elements: Vec::new(),
            forms: Vec::new(),
        }
    }

    pub fn element(&self, id: usize) -> Option<&InteractiveElement> {
        self.elements.iter().find(|element| element.id == id)
    }

    pub fn summary(&self) -> Value {
        json!({
            "url": self.url.as_str(),
            "status": self.status,
            "title": self.title,
            "text": self.text,
            "interactive_elements": self.elements.len(),
            "forms": self.forms.len(),
        })
    }
}

fn collect_forms<'a>(document: &'a Html, base: &Url) -> (Vec<Form>, Vec<ElementRef<'a>>) {
    let mut forms = Vec::new();
    let mut nodes = Vec::new();
    let (Ok(form_sel), Ok(field_sel)) = (
        Selector::parse("form"),
        Selector::parse("input[name], textarea[name], select[name]"),
    ) else {
        return (forms, nodes);
    };

    for form in document.select(&form_sel) {
        let action = form
            .value()
            .attr("action")
            .filter(|action| !action.trim().is_empty())
            .and_then(|action| base.join(action.trim()).ok())
            .unwrap_or_else(|| base.clone());
        let method = match form.value().attr("method") {
            Some(method) if method.eq_ignore_ascii_case("post") => FormMethod::Post,
            _ => FormMethod::Get,
        };
        let fields = form
            .select(&field_sel)
            .filter_map(default_field_value)
            .collect();

        forms.push(Form {
            index: forms.len(),
            action: action.to_string(),
            method,
            fields,
        });
        nodes.push(form);
    }
    (forms, nodes)
}

fn default_field_value(field: ElementRef<'_>) -> Option<(String, String)> {
    let element = field.value();
    let name = element.attr("name")?.to_string();
    match element.name() {
        "textarea" => Some((name, field.text().collect())),
        "select" => {
            let options = Selector::parse("option").ok()?;
            let chosen = field
                .select(&options)
                .find(|option| option.value().attr("selected").is_some())
                .or_else(|| field.select(&options).next());
            let value = chosen
                .map(|option| {
                    option
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| normalize(option.text()))
                })
                .unwrap_or_default();
            Some((name, value))
        }
        _ => {
            let kind = element.attr("type").unwrap_or("text").to_ascii_lowercase();
            match kind.as_str() {
                "submit" | "image" | "button" | "reset" | "file" => None,
                "checkbox" | "radio" => element
                    .attr("checked")
                    .map(|_| (name, element.attr("value").unwrap_or("on").to_string())),
                _ => Some((name, element.attr("value").unwrap_or_default().to_string())),
            }
        }
    }
}

fn collect_elements(
    document: &Html,
    base: &Url,
    form_nodes: &[ElementRef<'_>],
    limit: usize,
) -> Vec<InteractiveElement> {
    let Ok(selector) = Selector::parse("a[href], button, input, textarea, select") else {
        return Vec::new();
    };

    let mut elements = Vec::new();
    for el in document.select(&selector) {
        if elements.len() >= limit {
            break;
        }
        let value = el.value();
        let input_type = value.attr("type").map(str::to_ascii_lowercase);
        let (kind, href) = match value.name() {
            "a" => {
                let Some(href) = value
                    .attr("href")
                    .and_then(|href| base.join(href.trim()).ok())
                    .filter(|href| matches!(href.scheme(), "http" | "https"))
                else {
                    continue;
                };
                (ElementKind::Link, Some(href.to_string()))
            }
            "button" => (ElementKind::Button, None),
            "textarea" => (ElementKind::TextArea, None),
            "select" => (ElementKind::Select, None),
            _ if input_type.as_deref() == Some("hidden") => continue,
            _ => (ElementKind::Input, None),
        };

        let form = el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|ancestor| ancestor.value().name() == "form")
            .and_then(|form| form_nodes.iter().position(|node| *node == form));

        elements.push(InteractiveElement {
            id: elements.len() + 1,
            kind,
            label: label_for(el),
            href,
            name: value.attr("name").map(str::to_string),
            input_type,
            form,
            context: ancestor_context(el),
        });
    }
    elements
}

/// Walks up from `el` until an ancestor carries text beyond the element's
/// own, at most `CONTEXT_DEPTH` levels.
fn ancestor_context(el: ElementRef<'_>) -> Vec<AncestorSummary> {
    let own = visible_text(el);
    let mut context = Vec::new();
    for ancestor in el
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take_while(|ancestor| ancestor.value().name() != "html")
        .take(CONTEXT_DEPTH)
    {
        let value = ancestor.value();
        let text = visible_text(ancestor);
        let informative = !text.is_empty() && text != own;
        context.push(AncestorSummary {
            tag: value.name().to_string(),
            id: value.id().map(str::to_string),
            class: value
                .attr("class")
                .map(|class| normalize(std::iter::once(class)))
                .filter(|class| !class.is_empty()),
            text: if informative {
                truncate(&text, CONTEXT_CHARS)
            } else {
                String::new()
            },
        });
        if informative {
            break;
        }
    }
    context
}

fn label_for(el: ElementRef<'_>) -> String {
    let text = normalize(el.text());
    let label = if text.is_empty() {
        ["aria-label", "placeholder", "title", "value", "name", "alt"]
            .iter()
            .find_map(|attr| el.value().attr(attr).map(str::trim).filter(|v| !v.is_empty()))
            .unwrap_or_default()
            .to_string()
    } else {
        text
    };
    truncate(&label, LABEL_CHARS)
}

fn visible_text(root: ElementRef<'_>) -> String {
    let chunks = root.descendants().filter_map(|node| match node.value() {
        Node::Text(text) => {
            let hidden = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|el| matches!(el.value().name(), "script" | "style" | "noscript" | "template"));
            (!hidden).then_some(&**text)
        }
        _ => None,
    });
    normalize(chunks)
}

fn normalize<'a>(chunks: impl Iterator<Item = &'a str>) -> String {
    chunks
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP: &str = r#"
<html>
  <head><title> Corner Shop </title><style>body { color: red }</style></head>
  <body>
    <h1>Welcome</h1>
    <script>var tracking = 1;</script>
    <p>Fresh   bread daily.</p>
    <a href="/hours">Opening hours</a>
    <a href="mailto:shop@example.com">Mail us</a>
    <form action="/search" method="get">
      <input type="hidden" name="lang" value="en">
      <input type="text" name="q" placeholder="Search products">
      <button type="submit">Go</button>
    </form>
    <form action="https://accounts.example.com/update" method="POST">
      <select name="plan"><option value="basic">Basic</option><option value="pro" selected>Pro</option></select>
      <input type="checkbox" name="news" checked>
      <input type="submit" value="Save">
    </form>
  </body>
</html>"#;

    fn page() -> Page {
        Page::parse(
            Url::parse("https://shop.example.com/index.html").unwrap(),
            200,
            SHOP,
            &BrowserConfig::default(),
        )
    }

    #[test]
    fn extracts_title_and_visible_text() {
        let page = page();
        assert_eq!(page.title.as_deref(), Some("Corner Shop"));
        assert!(page.text.contains("Welcome Fresh bread daily."));
        assert!(!page.text.contains("tracking"));
        assert!(!page.text.contains("color"));
    }

    #[test]
    fn numbers_elements_and_links_them_to_forms() {
        let page = page();
        let labels: Vec<_> = page.elements.iter().map(|e| (e.id, e.label.as_str())).collect();
        assert_eq!(
            labels,
            vec![
                (1, "Opening hours"),
                (2, "Search products"),
                (3, "Go"),
                (4, "Basic Pro"),
                (5, "news"),
                (6, "Save"),
            ]
        );

        let link = page.element(1).unwrap();
        assert_eq!(link.href.as_deref(), Some("https://shop.example.com/hours"));
        assert_eq!(page.element(2).unwrap().form, Some(0));
        assert!(page.element(2).unwrap().accepts_text());
        assert!(page.element(3).unwrap().submits_form());
        assert!(page.element(6).unwrap().submits_form());
        assert_eq!(page.element(6).unwrap().form, Some(1));
    }

    #[test]
    fn form_defaults_and_staged_values_merge() {
        let page = page();
        let search = &page.forms[0];
        assert_eq!(search.action, "https://shop.example.com/search");
        assert_eq!(search.method, FormMethod::Get);

        let staged = BTreeMap::from([("q".to_string(), "rye bread".to_string())]);
        assert_eq!(
            search.submission(&staged),
            vec![
                ("lang".to_string(), "en".to_string()),
                ("q".to_string(), "rye bread".to_string()),
            ]
        );

        let account = &page.forms[1];
        assert_eq!(account.method, FormMethod::Post);
        assert_eq!(
            account.submission(&BTreeMap::new()),
            vec![
                ("plan".to_string(), "pro".to_string()),
                ("news".to_string(), "on".to_string()),
            ]
        );
    }

    #[test]
    fn element_context_stops_at_the_first_ancestor_with_text() {
        let html = r#"<html><body>
            <section id="billing">
              <h2>Billing address</h2>
              <div class="row  wide"><span><input name="street" placeholder="Street"></span></div>
            </section>
            <div><div><div><div><div><div><button>Deep</button></div></div></div></div></div></div>
        </body></html>"#;
        let page = Page::parse(
            Url::parse("https://shop.example.com/").unwrap(),
            200,
            html,
            &BrowserConfig::default(),
        );

        let street = &page.element(1).unwrap().context;
        let tags: Vec<_> = street.iter().map(|a| a.tag.as_str()).collect();
        assert_eq!(tags, vec!["span", "div", "section"]);
        assert_eq!(street[1].class.as_deref(), Some("row wide"));
        assert!(street[1].text.is_empty());
        assert_eq!(street[2].id.as_deref(), Some("billing"));
        assert_eq!(street[2].text, "Billing address");

        let deep = &page.element(2).unwrap().context;
        assert_eq!(deep.len(), 5);
        assert!(deep.iter().all(|a| a.tag == "div" && a.text.is_empty()));
    }

    #[test]
    fn text_and_element_counts_are_capped() {
        let config = BrowserConfig {
            max_elements: 2,
            max_text_chars: 10,
            ..BrowserConfig::default()
        };
        let page = Page::parse(
            Url::parse("https://shop.example.com/").unwrap(),
            200,
            SHOP,
            &config,
        );
        assert_eq!(page.elements.len(), 2);
        assert_eq!(page.text, "Welcome Fr...");
    }
}
