//! Generic API proxy payloads
//!
//! `ApiProxy` forwards a named filer sub-operation with XML arguments and
//! returns a nested results tree. Requests and results are both modelled
//! as `ApiElement` trees; typed extraction per sub-operation lives in
//! `crate::filer`.

use std::fmt::Write as _;

use crate::error::{DriverError, Result};

/// One XML element: a name and either text or child elements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiElement {
    pub name: String,
    pub text: Option<String>,
    pub children: Vec<ApiElement>,
}

impl ApiElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Element holding only text
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ApiElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn child(&self, name: &str) -> Option<&ApiElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ApiElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.text.as_deref())
    }

    /// Text of a required child; `api` names the sub-operation for the error.
    pub fn require_text(&self, api: &str, name: &str) -> Result<&str> {
        self.child_text(name).ok_or_else(|| DriverError::ApiFailed {
            api: api.to_string(),
            reason: format!("response has no '{}' in '{}'", name, self.name),
        })
    }

    /// Required child element
    pub fn require_child(&self, api: &str, name: &str) -> Result<&ApiElement> {
        self.child(name).ok_or_else(|| DriverError::ApiFailed {
            api: api.to_string(),
            reason: format!("response has no '{}' in '{}'", name, self.name),
        })
    }

    /// Elements named `item` inside the list element `list`.
    ///
    /// A missing list, or one carrying only text, reads as empty.
    pub fn list_items<'a>(&'a self, list: &str, item: &'a str) -> Vec<&'a ApiElement> {
        match self.child(list) {
            Some(list) => list.children_named(item).collect(),
            None => Vec::new(),
        }
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        let _ = write!(out, "<{}>", self.name);
        if let Some(text) = &self.text {
            out.push_str(&escape(text));
        }
        for child in &self.children {
            child.write_xml(out);
        }
        let _ = write!(out, "</{}>", self.name);
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// A named filer sub-operation and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub name: String,
    pub args: Vec<ApiElement>,
}

impl ProxyRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Add a text argument
    pub fn arg(mut self, name: &str, value: impl Into<String>) -> Self {
        self.args.push(ApiElement::leaf(name, value));
        self
    }

    /// Add a structured argument
    pub fn element(mut self, element: ApiElement) -> Self {
        self.args.push(element);
        self
    }

    pub fn arg_text(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.text.as_deref())
    }

    pub fn arg_element(&self, name: &str) -> Option<&ApiElement> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Arguments as the raw XML fragment the proxy forwards
    pub fn args_xml(&self) -> String {
        self.args.iter().map(ApiElement::to_xml).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: ProxyStatus,
    pub reason: Option<String>,
    /// Root element named `results`
    pub results: ApiElement,
}

impl ProxyResponse {
    pub fn passed(results: ApiElement) -> Self {
        Self {
            status: ProxyStatus::Passed,
            reason: None,
            results,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ProxyStatus::Failed,
            reason: Some(reason.into()),
            results: ApiElement::new("results"),
        }
    }

    /// Results of a passed call; a failed one becomes `ApiFailed`.
    pub fn into_results(self, request: &ProxyRequest) -> Result<ApiElement> {
        match self.status {
            ProxyStatus::Passed => Ok(self.results),
            ProxyStatus::Failed => Err(DriverError::ApiFailed {
                api: request.name.clone(),
                reason: self.reason.unwrap_or_else(|| "unknown reason".to_string()),
            }),
        }
    }
}
