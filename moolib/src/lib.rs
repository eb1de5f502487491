//! moolib: a mailcow API client driven by the server's OpenAPI schema.
//!
//! Nothing here knows a single mailcow endpoint ahead of time: the schema is
//! fetched at startup, translated into an [`schema::EndpointRegistry`], and
//! that registry drives both the generated CLI ([`cli::build_cli`]) and the
//! requests sent back ([`cli::drive_command`]).

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::Value;

pub mod cli;
pub mod config;
pub mod error;
pub mod schema;

pub use error::{Error, Result};

const USER_AGENT: &str = concat!("mailcow-cli/", env!("CARGO_PKG_VERSION"));

// =====================
// Schema document
// =====================

/// Parse the raw schema bytes as YAML first, then JSON, into a generic
/// document tree. No conformance validation happens here; the registry
/// builder only cares about the `paths` table.
pub fn parse_schema_document(raw: &str) -> Result<Value> {
    serde_yaml::from_str::<Value>(raw)
        .ok()
        .filter(Value::is_object)
        .or_else(|| serde_json::from_str::<Value>(raw).ok().filter(Value::is_object))
        .ok_or_else(|| {
            Error::SchemaFetch("schema document is not a YAML or JSON object".to_string())
        })
}

/// Remove multi-space runs and surrounding whitespace.
///
/// Keeps multi-line payloads readable on a single debug log line.
pub fn chomp(data: &str) -> String {
    static MULTI_SPACE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[ ]{2,}").expect("valid regex"));
    MULTI_SPACE.replace_all(data.trim(), "").to_string()
}

// =====================
// Client
// =====================

/// Connection to one mailcow instance.
///
/// Wraps a blocking HTTP session carrying the instance's API token; all
/// requests are built from the `/api/v1/<modifier>/<section>` convention.
#[derive(Debug)]
pub struct MailCow {
    /// Configuration name of the instance.
    pub server: String,
    /// Base URL, e.g. `https://mail.example.com`.
    pub url: String,
    token: String,
    request_url: String,
    session: Client,
}

impl MailCow {
    /// Connect using a server entry from the configuration file.
    pub fn connect(settings: &config::Settings, server: Option<&str>) -> Result<Self> {
        let (name, server_cfg) = settings.server(server)?;
        let ssl_verify = settings.ssl_verify(server_cfg);
        let timeout = settings.timeout(server_cfg);
        log::debug!("request session verify: {}", ssl_verify);
        log::debug!("request session timeout: {}", timeout);
        Self::build(name, &server_cfg.url, &server_cfg.token, ssl_verify, timeout)
    }

    /// Connect to an explicit URL, bypassing the configuration file.
    pub fn new(url: &str, token: &str) -> Result<Self> {
        Self::build(url, url, token, true, 30)
    }

    fn build(
        name: &str,
        url: &str,
        token: &str,
        ssl_verify: bool,
        timeout: u64,
    ) -> Result<Self> {
        let session = Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(!ssl_verify)
            .timeout(Duration::from_secs(timeout))
            .build()?;
        let url = url.trim_end_matches('/').to_string();
        Ok(Self {
            server: name.to_string(),
            request_url: format!("{url}/api/v1"),
            url,
            token: token.to_string(),
            session,
        })
    }

    /// Read the OpenAPI schema from the instance.
    pub fn fetch_schema(&self) -> Result<Value> {
        let url = format!("{}/api/openapi.yaml", self.url);
        log::debug!("fetching schema from {}", url);
        let response = self
            .session
            .get(&url)
            .header("X-API-Key", self.token.as_str())
            .send()
            .map_err(|err| Error::SchemaFetch(err.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::SchemaFetch(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        let text = response
            .text()
            .map_err(|err| Error::SchemaFetch(err.to_string()))?;
        parse_schema_document(&text)
    }

    fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        log::debug!("request URL: {}", url);
        let mut request = self
            .session
            .request(method, url)
            .header("X-API-Key", self.token.as_str());
        if let Some(body) = body {
            log::debug!("request payload: {}", chomp(&body.to_string()));
            request = request.json(body);
        }

        let response = request.send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: chomp(&text),
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// GET `/api/v1/get/<section>`; `section` may carry extra path segments
    /// resolved by [`schema::resolve_get_path`].
    pub fn get_request(&self, section: &str) -> Result<Value> {
        let url = format!("{}/get/{}", self.request_url, section);
        self.request(Method::GET, &url, None)
    }

    /// POST the attribute payload to `/api/v1/add/<section>`.
    pub fn add_request(
        &self,
        section: &str,
        attributes: &serde_json::Map<String, Value>,
    ) -> Result<Value> {
        let url = format!("{}/add/{}", self.request_url, section);
        self.request(Method::POST, &url, Some(&Value::Object(attributes.clone())))
    }

    /// POST `{items, attr, action}` to `/api/v1/edit/<section>`, with empty
    /// members dropped.
    pub fn edit_request(
        &self,
        section: &str,
        items: Option<Vec<String>>,
        attr: Option<serde_json::Map<String, Value>>,
        action: Option<&str>,
    ) -> Result<Value> {
        let mut payload = serde_json::Map::new();
        if let Some(items) = items {
            payload.insert(
                "items".to_string(),
                Value::Array(items.into_iter().map(Value::String).collect()),
            );
        }
        if let Some(attr) = attr {
            payload.insert("attr".to_string(), Value::Object(attr));
        }
        if let Some(action) = action {
            payload.insert("action".to_string(), Value::String(action.to_string()));
        }

        let url = format!("{}/edit/{}", self.request_url, section);
        self.request(Method::POST, &url, Some(&Value::Object(payload)))
    }

    /// POST the items array to `/api/v1/delete/<section>`; the body is the
    /// bare array, not an object.
    pub fn delete_request(&self, section: &str, items: &[String]) -> Result<Value> {
        let body = Value::Array(items.iter().cloned().map(Value::String).collect());
        let url = format!("{}/delete/{}", self.request_url, section);
        self.request(Method::POST, &url, Some(&body))
    }
}

// =====================
// Output rendering
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// Render response data in the requested format.
#[must_use]
pub fn render(
    data: &Value,
    format: OutputFormat,
    vertical: bool,
    fields: Option<&[String]>,
) -> String {
    match format {
        OutputFormat::Json => as_json(data),
        OutputFormat::Yaml => as_yaml(data),
        OutputFormat::Table => render_table(data, vertical, fields),
    }
}

#[must_use]
pub fn as_json(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}

#[must_use]
pub fn as_yaml(data: &Value) -> String {
    serde_yaml::to_string(data).unwrap_or_else(|_| data.to_string())
}

/// Render data as ASCII tables.
///
/// An array of objects becomes one table whose columns are the union of the
/// keys in first-seen order (optionally filtered to `fields`); with
/// `vertical` each record becomes its own Key/Value table. A single object
/// is treated as a one-record array.
#[must_use]
pub fn render_table(data: &Value, vertical: bool, fields: Option<&[String]>) -> String {
    let records: Vec<&serde_json::Map<String, Value>> = match data {
        Value::Array(entries) => entries.iter().filter_map(Value::as_object).collect(),
        Value::Object(map) => vec![map],
        other => return scalar_to_string(other),
    };
    if records.is_empty() {
        return "(empty)".to_string();
    }

    if vertical {
        let tables: Vec<String> = records
            .iter()
            .map(|record| {
                let rows: Vec<Vec<String>> = record
                    .iter()
                    .map(|(key, value)| vec![key.clone(), scalar_to_string(value)])
                    .collect();
                format_table(&["Key".to_string(), "Value".to_string()], &rows)
            })
            .collect();
        return tables.join("\n");
    }

    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    if let Some(fields) = fields {
        columns.retain(|column| fields.contains(column));
    }
    if columns.is_empty() {
        return "(empty)".to_string();
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|column| {
                    record
                        .get(column)
                        .map(scalar_to_string)
                        .unwrap_or_default()
                })
                .collect()
        })
        .collect();
    format_table(&columns, &rows)
}

fn format_table(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let mut separator = String::from("+");
    for width in &widths {
        separator.push_str(&"-".repeat(width + 2));
        separator.push('+');
    }

    let format_row = |cells: &[String]| -> String {
        let parts: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!(" {:<width$} ", cell, width = widths[i]))
            .collect();
        format!("|{}|", parts.join("|"))
    };

    let mut out = String::new();
    out.push_str(&separator);
    out.push('\n');
    out.push_str(&format_row(columns));
    out.push('\n');
    out.push_str(&separator);
    out.push('\n');
    for row in rows {
        out.push_str(&format_row(row));
        out.push('\n');
    }
    out.push_str(&separator);
    out
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
