use serde_json::{Map, Value};

/// Properties tried, in order, for the popup heading.
pub const TITLE_KEYS: [&str; 4] = ["name", "title", "id", "label"];

/// Feature popup content: an optional heading and the remaining properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Popup {
    pub title: Option<String>,
    pub rows: Vec<(String, String)>,
}

impl Popup {
    /// `None` for features without properties.
    pub fn from_properties(properties: &Map<String, Value>) -> Option<Self> {
        if properties.is_empty() {
            return None;
        }

        let title_key = TITLE_KEYS
            .iter()
            .copied()
            .find(|k| properties.get(*k).is_some_and(|v| !v.is_null()));
        let title = title_key.and_then(|k| properties.get(k)).map(display_value);

        let rows = properties
            .iter()
            .filter(|(k, _)| Some(k.as_str()) != title_key)
            .map(|(k, v)| (k.clone(), display_value(v)))
            .collect();

        Some(Self { title, rows })
    }

    pub fn to_html(&self) -> String {
        let mut html = String::from("<div class=\"gis-popup\">");
        if let Some(title) = &self.title {
            html.push_str("<h4>");
            html.push_str(&escape_html(title));
            html.push_str("</h4>");
        }
        if !self.rows.is_empty() {
            html.push_str("<table>");
            for (key, value) in &self.rows {
                html.push_str("<tr><th>");
                html.push_str(&escape_html(key));
                html.push_str("</th><td>");
                html.push_str(&escape_html(value));
                html.push_str("</td></tr>");
            }
            html.push_str("</table>");
        }
        html.push_str("</div>");
        html
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Structured values are shown as compact JSON.
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
