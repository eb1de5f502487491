//! Translation of the server's OpenAPI schema into a command registry.
//!
//! The registry is built once per session from the raw schema document and
//! read thereafter: the CLI builder derives one command per section/modifier
//! pair from it, and the request side uses it to turn runtime argument values
//! back into JSON payloads (`assemble_attributes`) and literal read paths
//! (`resolve_get_path`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};

// =====================
// Argument model
// =====================

/// Normalized type of one accepted argument.
///
/// `Bool` is the plain on/off selector produced for path components such as
/// `all`; `Boolean` is the tri-state kind that also grows a `--no-<name>`
/// companion flag. `None` stands for a schema fragment that declared no type
/// at all and must still be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Number,
    Bool,
    Boolean,
    Array,
    Object,
    None,
}

impl ArgKind {
    fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Option::None => ArgKind::None,
            Some("bool") => ArgKind::Bool,
            Some("boolean") => ArgKind::Boolean,
            Some("number") => ArgKind::Number,
            Some("array") => ArgKind::Array,
            Some("object") => ArgKind::Object,
            Some(_) => ArgKind::String,
        }
    }
}

/// One accepted argument of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub kind: ArgKind,
    /// Allowed literal values, when the schema restricts them.
    pub choices: Option<Vec<String>>,
}

impl ArgumentDescriptor {
    fn new(name: &str, description: Option<String>, kind: ArgKind) -> Self {
        Self {
            name: name.to_string(),
            description,
            // `active` is declared as number on a handful of add operations
            // but behaves as a tri-state boolean everywhere
            kind: if name == "active" { ArgKind::Boolean } else { kind },
            choices: None,
        }
    }

    /// Build a descriptor from a raw JSON-schema fragment.
    fn from_fragment(name: &str, fragment: &Value) -> Self {
        let description = fragment
            .get("description")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let kind = ArgKind::from_raw(fragment.get("type").and_then(Value::as_str));
        let choices = fragment.get("enum").and_then(Value::as_array).map(|vals| {
            vals.iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        });
        let mut descriptor = Self::new(name, description, kind);
        descriptor.choices = choices;
        descriptor
    }
}

/// Operation modifier: the second path segment under `/api/v1/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Modifier {
    Get,
    Add,
    Edit,
    Delete,
}

impl Modifier {
    #[must_use]
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "get" => Some(Modifier::Get),
            "add" => Some(Modifier::Add),
            "edit" => Some(Modifier::Edit),
            "delete" => Some(Modifier::Delete),
            _ => Option::None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::Get => "get",
            Modifier::Add => "add",
            Modifier::Edit => "edit",
            Modifier::Delete => "delete",
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =====================
// Path parsing
// =====================

/// Parsed structure of one raw OpenAPI path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathShape {
    pub modifier: Modifier,
    pub section: String,
    /// Sub-resource discriminator, e.g. `no_log` or a named component.
    pub component: Option<String>,
    pub is_all: bool,
    /// Brace-delimited token when the path addresses one resource, e.g. `{id}`.
    pub path_parameter: Option<String>,
}

fn is_parameter_token(token: &str) -> bool {
    token.starts_with('{') && token.ends_with('}') && token.len() >= 3
}

/// Split an API path like `/api/v1/get/syncjobs/all/no_log` into its pieces.
///
/// The first three segments (the API version prefix) are discarded; the rest
/// is `<modifier>/<section>[/<component-or-all>][/<parameter>]`. A trailing
/// `no_log` always wins as component, and a trailing brace token is captured
/// as the path parameter.
pub fn describe_path(path: &str) -> Result<PathShape> {
    let segments: Vec<&str> = path
        .split('/')
        .skip(3)
        .filter(|s| !s.is_empty())
        .collect();

    if segments.len() < 2 {
        return Err(Error::SchemaShape(format!(
            "path {path:?} has fewer segments than <modifier>/<section>"
        )));
    }

    let modifier = Modifier::from_segment(segments[0]).ok_or_else(|| {
        Error::SchemaShape(format!("unknown modifier {:?} in path {path:?}", segments[0]))
    })?;
    let section = segments[1].to_string();
    let last = segments[segments.len() - 1];

    let mut is_all = false;
    let mut component = Option::None;
    if segments.len() > 2 {
        is_all = segments[2] == "all";
        if !is_parameter_token(segments[2]) && segments[2] != "all" {
            component = Some(segments[2].to_string());
        }
    }
    // fixed two-level suffix used by the syncjobs family
    if last == "no_log" {
        component = Some("no_log".to_string());
    }
    let path_parameter = if is_parameter_token(last) {
        Some(last.to_string())
    } else {
        Option::None
    };

    Ok(PathShape {
        modifier,
        section,
        component,
        is_all,
        path_parameter,
    })
}

// =====================
// Operation filtering
// =====================

/// Pull the `parameters` array and the JSON request-body schema out of one
/// path entry (an object keyed by its single HTTP verb).
pub fn filter_operation(entry: &Value) -> Result<(Option<Vec<Value>>, Value)> {
    let operations = entry
        .as_object()
        .ok_or_else(|| Error::SchemaShape("path entry is not an object".to_string()))?;
    let (_, operation) = operations
        .iter()
        .next()
        .ok_or_else(|| Error::SchemaShape("path entry has no operations".to_string()))?;

    let parameters = operation
        .get("parameters")
        .and_then(Value::as_array)
        .cloned();
    let body_schema = operation.pointer("/requestBody/content/application~1json/schema");

    if parameters.is_none() && body_schema.is_none() {
        return Err(Error::SchemaShape(
            "operation declares neither parameters nor requestBody".to_string(),
        ));
    }

    let schema = body_schema
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    Ok((parameters, schema))
}

// =====================
// Argument extraction
// =====================

/// Convert an OpenAPI `parameters` array into descriptors, keeping only the
/// entries passed via the URL path.
pub fn parameters_from_list(parameters: &[Value]) -> BTreeMap<String, ArgumentDescriptor> {
    let mut arguments = BTreeMap::new();
    for parameter in parameters {
        if parameter.get("in").and_then(Value::as_str) != Some("path") {
            continue;
        }
        let Some(name) = parameter.get("name").and_then(Value::as_str) else {
            continue;
        };
        let description = parameter
            .get("description")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let kind = ArgKind::from_raw(
            parameter
                .pointer("/schema/type")
                .and_then(Value::as_str),
        );
        arguments.insert(
            name.to_string(),
            ArgumentDescriptor::new(name, description, kind),
        );
    }
    arguments
}

/// Synthesize the descriptor for a selector that appears as a path segment
/// rather than a query or body field.
///
/// The kind is deliberately `Bool`, not `Boolean`: a selector is a plain
/// presence flag and never grows a negation form.
pub fn selector_parameter(name: &str) -> ArgumentDescriptor {
    ArgumentDescriptor::new(name, Some(format!("get {name} entries")), ArgKind::Bool)
}

/// Flatten a request-body schema into `name -> raw fragment`.
///
/// Compensates for two real-world shapes: a bare top-level `items` (missing
/// the usual `properties` nesting) and mutable fields tucked under an `attr`
/// object even though the API accepts them flat.
pub fn properties_from_schema(schema: &Value) -> BTreeMap<String, Value> {
    let mut properties: BTreeMap<String, Value> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    if let Some(items) = schema.get("items") {
        properties.insert("items".to_string(), items.clone());
    }

    if let Some(attr) = properties.remove("attr") {
        if let Some(nested) = attr.get("properties").and_then(Value::as_object) {
            for (name, fragment) in nested {
                properties.insert(name.clone(), fragment.clone());
            }
        }
    }

    properties
}

// =====================
// Registry
// =====================

/// Three-level table: section -> modifier -> argument name -> descriptor.
///
/// Built once from the schema document; all later consumers take it by
/// shared reference and never mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointRegistry {
    sections: BTreeMap<String, BTreeMap<Modifier, BTreeMap<String, ArgumentDescriptor>>>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn sections(
        &self,
    ) -> &BTreeMap<String, BTreeMap<Modifier, BTreeMap<String, ArgumentDescriptor>>> {
        &self.sections
    }

    #[must_use]
    pub fn operation(
        &self,
        section: &str,
        modifier: Modifier,
    ) -> Option<&BTreeMap<String, ArgumentDescriptor>> {
        self.sections.get(section).and_then(|m| m.get(&modifier))
    }

    /// Like [`EndpointRegistry::operation`] but failing with
    /// [`Error::UnknownOperation`] for diagnosability.
    pub fn require_operation(
        &self,
        section: &str,
        modifier: Modifier,
    ) -> Result<&BTreeMap<String, ArgumentDescriptor>> {
        self.operation(section, modifier)
            .ok_or_else(|| Error::UnknownOperation {
                section: section.to_string(),
                modifier,
            })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    // Union merge: later paths contribute additional descriptors, colliding
    // names overwrite. Two raw paths mapping to the same (section, modifier)
    // expose the union of their arguments as one operation.
    fn merge(
        &mut self,
        section: &str,
        modifier: Modifier,
        arguments: BTreeMap<String, ArgumentDescriptor>,
    ) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .entry(modifier)
            .or_default()
            .extend(arguments);
    }
}

/// Build the endpoint registry from a parsed schema document.
///
/// Paths that do not match the expected shape are skipped with a warning;
/// a partial registry is more useful than none.
pub fn build_registry(document: &Value) -> Result<EndpointRegistry> {
    let paths = document
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::SchemaFetch("schema document has no paths table".to_string()))?;

    let mut registry = EndpointRegistry::default();
    for (raw_path, entry) in paths {
        let parsed = describe_path(raw_path)
            .and_then(|shape| filter_operation(entry).map(|filtered| (shape, filtered)));
        let (shape, (parameters, schema)) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("skipping path {}: {}", raw_path, err);
                continue;
            }
        };

        let mut arguments = BTreeMap::new();
        // a path targeting "all" resources, or one resource by generic id,
        // accepts the uniform all/identifier selector
        if shape.is_all || shape.path_parameter.as_deref() == Some("{id}") {
            arguments.insert("all".to_string(), selector_parameter("all"));
        }
        if let Some(component) = &shape.component {
            arguments.insert(component.clone(), selector_parameter(component));
        }
        if let Some(parameters) = parameters {
            arguments.extend(parameters_from_list(&parameters));
        }
        for (name, fragment) in properties_from_schema(&schema) {
            arguments.insert(name.clone(), ArgumentDescriptor::from_fragment(&name, &fragment));
        }

        registry.merge(&shape.section, shape.modifier, arguments);
    }

    Ok(registry)
}

// =====================
// Runtime values
// =====================

/// Argument values supplied at invocation time, plus the set of names whose
/// negation flag was explicitly present.
///
/// Booleans are tri-state: absent, true, or explicitly negated.
#[derive(Debug, Clone, Default)]
pub struct RuntimeValues {
    values: BTreeMap<String, Value>,
    negated: BTreeSet<String>,
}

impl RuntimeValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn negate(&mut self, name: impl Into<String>) {
        self.negated.insert(name.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    #[must_use]
    pub fn is_negated(&self, name: &str) -> bool {
        self.negated.contains(name)
    }

    #[must_use]
    pub fn is_true(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Value::Bool(true)))
    }

    /// A value is supplied when it is present and non-empty.
    fn supplied(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| truthy(v))
    }

    /// String list accessor for batch arguments such as `items`.
    #[must_use]
    pub fn string_list(&self, name: &str) -> Vec<String> {
        match self.values.get(name) {
            Some(Value::Array(values)) => values.iter().map(path_segment).collect(),
            Some(single) => vec![path_segment(single)],
            Option::None => Vec::new(),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn path_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =====================
// Request derivation
// =====================

/// Filter and normalize runtime values into the flat JSON attribute payload
/// for add/edit operations.
///
/// Only names the registry declares for this operation can appear in the
/// output. Booleans serialize as the decimal strings `"1"`/`"0"`; an explicit
/// negation forces `"0"`; unset names and the positional `items` batch are
/// dropped.
pub fn assemble_attributes(
    registry: &EndpointRegistry,
    section: &str,
    modifier: Modifier,
    values: &RuntimeValues,
) -> Result<serde_json::Map<String, Value>> {
    let arguments = registry.require_operation(section, modifier)?;

    let mut attributes = serde_json::Map::new();
    for name in arguments.keys() {
        // items are sent as a separate positional batch, never as a body attribute
        if name == "items" {
            continue;
        }
        if values.is_negated(name) {
            attributes.insert(name.clone(), Value::String("0".to_string()));
            continue;
        }
        match values.get(name) {
            Some(Value::Bool(b)) => {
                let flag = if *b { "1" } else { "0" };
                attributes.insert(name.clone(), Value::String(flag.to_string()));
            }
            Some(other) => {
                attributes.insert(name.clone(), other.clone());
            }
            Option::None => {}
        }
    }

    Ok(attributes)
}

/// Re-derive the literal request path for a read operation.
///
/// Read paths embed their selectors positionally: each true `bool` selector
/// becomes a path segment (with an optional trailing count), `all`/`no_log`
/// override that, a mailbox appends, and an id or domain resets the whole
/// path, domain winning last.
///
/// ```
/// # use moolib::schema::{build_registry, resolve_get_path, RuntimeValues};
/// # use serde_json::{json, Value};
/// let document = json!({"paths": {
///     "/api/v1/get/syncjobs/all/no_log": {"get": {"parameters": []}},
/// }});
/// let registry = build_registry(&document).unwrap();
/// let mut values = RuntimeValues::new();
/// values.set("all", Value::Bool(true));
/// values.set("no_log", Value::Bool(true));
/// let path = resolve_get_path(&registry, "syncjobs", &values).unwrap();
/// assert_eq!(path, "syncjobs/all/no_log");
/// ```
pub fn resolve_get_path(
    registry: &EndpointRegistry,
    section: &str,
    values: &RuntimeValues,
) -> Result<String> {
    let arguments = registry.require_operation(section, Modifier::Get)?;

    let mut return_path = section.to_string();
    for (name, descriptor) in arguments {
        if descriptor.kind == ArgKind::Bool && values.is_true(name) {
            return_path = format!("{section}/{name}");
            if let Some(count) = values.supplied("count") {
                return_path = format!("{}/{}", return_path, path_segment(count));
            }
        }
    }

    if values.is_true("all") {
        return_path = format!("{section}/all");
        if values.is_true("no_log") {
            return_path.push_str("/no_log");
        }
    }

    if let Some(mailbox) = values.supplied("mailbox") {
        return_path = format!("{}/{}", return_path, path_segment(mailbox));
    }

    // id and domain address a single resource and override everything above
    if let Some(id) = values.supplied("id") {
        return_path = format!("{}/{}", section, path_segment(id));
    }
    if let Some(domain) = values.supplied("domain") {
        return_path = format!("{}/{}", section, path_segment(domain));
    }

    Ok(return_path)
}
