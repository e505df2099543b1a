use anyhow::{anyhow, Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Variable bindings used to fill `{name}` placeholders.
pub type Bindings = BTreeMap<String, String>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Method> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Method::parse(s).ok_or_else(|| anyhow!("unsupported HTTP method: {s}"))
    }
}

impl TryFrom<String> for Method {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request shape the probe attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub method: Method,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Candidate {
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path, Some(body))
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// A candidate whose path and string body leaves may hold `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTemplate {
    pub method: Method,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl CandidateTemplate {
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }

    pub fn render(&self, bindings: &Bindings) -> Result<Candidate> {
        let re = &*PLACEHOLDER;
        let path = fill(re, &self.path, bindings)
            .with_context(|| format!("rendering path {}", self.path))?;
        let body = match &self.body {
            Some(b) => Some(
                fill_value(re, b, bindings)
                    .with_context(|| format!("rendering body for {}", self.path))?,
            ),
            None => None,
        };
        Ok(Candidate {
            method: self.method,
            path,
            body,
        })
    }
}

fn fill(re: &Regex, s: &str, bindings: &Bindings) -> Result<String> {
    let mut missing = None;
    let out = re.replace_all(s, |caps: &Captures| match bindings.get(&caps[1]) {
        Some(v) => v.clone(),
        None => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });
    if let Some(name) = missing {
        return Err(anyhow!("no binding for placeholder {{{name}}}"));
    }
    Ok(out.into_owned())
}

fn fill_value(re: &Regex, v: &Value, bindings: &Bindings) -> Result<Value> {
    Ok(match v {
        Value::String(s) => Value::String(fill(re, s, bindings)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|i| fill_value(re, i, bindings))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, item) in map {
                out.insert(k.clone(), fill_value(re, item, bindings)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

/// Route sweep: the same method and body against every path, in order.
pub fn for_paths(method: Method, paths: &[String], body: Option<&Value>) -> Vec<Candidate> {
    paths
        .iter()
        .map(|p| Candidate::new(method, p.clone(), body.cloned()))
        .collect()
}

/// Credential sweep: one candidate per binding, in order.
pub fn for_bindings(template: &CandidateTemplate, bindings: &[Bindings]) -> Result<Vec<Candidate>> {
    bindings.iter().map(|b| template.render(b)).collect()
}

/// Paths outer, bindings inner. With no bindings each path renders once
/// against an empty map.
pub fn expand(
    method: Method,
    paths: &[String],
    body: Option<&Value>,
    bindings: &[Bindings],
) -> Result<Vec<Candidate>> {
    let empty = [Bindings::new()];
    let bindings = if bindings.is_empty() {
        &empty[..]
    } else {
        bindings
    };

    let mut out = Vec::with_capacity(paths.len() * bindings.len());
    for path in paths {
        let template = CandidateTemplate::new(method, path.clone(), body.cloned());
        out.extend(for_bindings(&template, bindings)?);
    }
    Ok(out)
}
