//! Dynamic CLI assembly from the endpoint registry.
//!
//! One subcommand per section, one nested subcommand per modifier, one flag
//! per argument descriptor. The flag shape (toggle, single value, repeated
//! value; free/choice/integer parsing) is resolved once per descriptor and
//! shared between command building and runtime-value collection so the two
//! can never disagree.

use std::collections::BTreeMap;

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;

use crate::error::Result;
use crate::schema::{
    assemble_attributes, resolve_get_path, ArgKind, ArgumentDescriptor, EndpointRegistry,
    Modifier, RuntimeValues,
};
use crate::MailCow;

/// Clap's builder API wants `'static` strings for command and argument names,
/// but ours are owned `String`s derived from the runtime schema. The CLI is
/// built once per process and the leaked names are small, so leaking them is
/// the simplest way to satisfy that requirement.
fn leak_str<S: Into<String>>(s: S) -> &'static str {
    Box::leak(s.into().into_boxed_str())
}

// =====================
// Flag shapes
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    /// Presence-only flag; `negatable` adds the `--no-<name>` companion.
    Toggle { negatable: bool },
    Single,
    Repeated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueShape {
    Free,
    Choice,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlagShape {
    arity: Arity,
    value: ValueShape,
}

fn flag_shape(descriptor: &ArgumentDescriptor) -> FlagShape {
    let arity = match descriptor.kind {
        // no declared type: an untyped free-text flag taking one value
        ArgKind::None => Arity::Single,
        ArgKind::Bool => Arity::Toggle { negatable: false },
        ArgKind::Boolean => Arity::Toggle { negatable: true },
        ArgKind::Object | ArgKind::Array => Arity::Repeated,
        // typed items batch-target several ids
        ArgKind::String | ArgKind::Number if descriptor.name == "items" => Arity::Repeated,
        ArgKind::String | ArgKind::Number => Arity::Single,
    };
    let value = if descriptor.choices.is_some() {
        ValueShape::Choice
    } else if descriptor.kind == ArgKind::Number {
        ValueShape::Integer
    } else {
        ValueShape::Free
    };
    FlagShape { arity, value }
}

fn build_flags(descriptor: &ArgumentDescriptor) -> Vec<Arg> {
    let shape = flag_shape(descriptor);
    let id = leak_str(descriptor.name.clone());
    let mut arg = Arg::new(id).long(id);

    let mut help = descriptor.description.clone().unwrap_or_default();
    match shape.arity {
        Arity::Toggle { .. } => {
            arg = arg.action(ArgAction::SetTrue);
        }
        Arity::Single => {
            arg = arg.num_args(1);
        }
        Arity::Repeated => {
            arg = arg.action(ArgAction::Append);
            if matches!(descriptor.kind, ArgKind::Object | ArgKind::Array) {
                help = format!("{help}. Can be used multiple times.");
            }
        }
    }
    if !matches!(shape.arity, Arity::Toggle { .. }) {
        match shape.value {
            ValueShape::Choice => {
                let choices = descriptor.choices.clone().unwrap_or_default();
                arg = arg.value_parser(clap::builder::PossibleValuesParser::new(choices));
            }
            ValueShape::Integer => {
                arg = arg.value_parser(clap::value_parser!(i64));
            }
            ValueShape::Free => {}
        }
    }
    if !help.is_empty() {
        arg = arg.help(help);
    }

    let mut flags = vec![arg];
    if let Arity::Toggle { negatable: true } = shape.arity {
        let no_id = leak_str(format!("no-{}", descriptor.name));
        flags.push(
            Arg::new(no_id)
                .long(no_id)
                .help(format!("force {} off", descriptor.name))
                .action(ArgAction::SetTrue),
        );
    }
    flags
}

// =====================
// Command tree
// =====================

/// Materialize the full command tree: global options plus one
/// section/modifier command per registry entry.
pub fn build_cli(registry: &EndpointRegistry, default_conf: &str) -> Command {
    let mut app = Command::new("mailcow-cli")
        .about("Interact with mailcow's API")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("create-example-config")
                .long("create-example-config")
                .help("Create configuration file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("conf")
                .long("conf")
                .short('c')
                .help("Path to configuration file")
                .num_args(1)
                .default_value(leak_str(default_conf.to_string())),
        )
        .arg(
            Arg::new("openapi-file")
                .long("openapi-file")
                .help("Read the OpenAPI schema from a file instead of the server")
                .num_args(1),
        )
        .arg(
            Arg::new("vertical")
                .long("vertical")
                .short('v')
                .help("Print (table) results vertically")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print results as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("yaml")
                .long("yaml")
                .short('y')
                .help("Print results as YAML")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("table")
                .long("table")
                .short('t')
                .help("Print results as table")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .help("Enable debugging")
                .action(ArgAction::SetTrue),
        );

    for (section, modifiers) in registry.sections() {
        let mut section_cmd = Command::new(leak_str(section.clone()));
        for (modifier, arguments) in modifiers {
            let mut modifier_cmd = Command::new(modifier.as_str());
            for descriptor in arguments.values() {
                for arg in build_flags(descriptor) {
                    modifier_cmd = modifier_cmd.arg(arg);
                }
            }
            // read results are rendered as tables; let the user pick columns
            if *modifier == Modifier::Get && !arguments.contains_key("fields") {
                modifier_cmd = modifier_cmd.arg(
                    Arg::new("fields")
                        .long("fields")
                        .help("only display specified row(s)")
                        .action(ArgAction::Append),
                );
            }
            section_cmd = section_cmd.subcommand(modifier_cmd);
        }
        app = app.subcommand(section_cmd);
    }

    app
}

/// Walk the parsed matches down to the `(section, modifier)` leaf.
#[must_use]
pub fn collect_operation_path(matches: &ArgMatches) -> Option<(&str, Modifier, &ArgMatches)> {
    let (section, section_matches) = matches.subcommand()?;
    let (modifier, leaf) = section_matches.subcommand()?;
    Some((section, Modifier::from_segment(modifier)?, leaf))
}

/// Convert parsed matches back into runtime values, preserving tri-state
/// booleans (absent / set / explicitly negated).
#[must_use]
pub fn collect_runtime_values(
    arguments: &BTreeMap<String, ArgumentDescriptor>,
    matches: &ArgMatches,
) -> RuntimeValues {
    let mut values = RuntimeValues::new();
    for (name, descriptor) in arguments {
        let shape = flag_shape(descriptor);
        match shape.arity {
            Arity::Toggle { negatable } => {
                if matches.get_flag(name) {
                    values.set(name.clone(), Value::Bool(true));
                }
                if negatable && matches.get_flag(&format!("no-{name}")) {
                    values.negate(name.clone());
                }
            }
            Arity::Single => match shape.value {
                ValueShape::Integer => {
                    if let Some(number) = matches.get_one::<i64>(name) {
                        values.set(name.clone(), Value::from(*number));
                    }
                }
                ValueShape::Free | ValueShape::Choice => {
                    if let Some(text) = matches.get_one::<String>(name) {
                        values.set(name.clone(), Value::String(text.clone()));
                    }
                }
            },
            Arity::Repeated => match shape.value {
                ValueShape::Integer => {
                    if let Some(numbers) = matches.get_many::<i64>(name) {
                        values.set(
                            name.clone(),
                            Value::Array(numbers.map(|n| Value::from(*n)).collect()),
                        );
                    }
                }
                ValueShape::Free | ValueShape::Choice => {
                    if let Some(texts) = matches.get_many::<String>(name) {
                        values.set(
                            name.clone(),
                            Value::Array(texts.map(|t| Value::String(t.clone())).collect()),
                        );
                    }
                }
            },
        }
    }
    values
}

/// Split comma-separated `--fields` values, unless printing vertically.
#[must_use]
pub fn parse_fields(fields: Option<Vec<String>>, vertical: bool) -> Option<Vec<String>> {
    let fields = fields?;
    if vertical {
        return Some(fields);
    }
    let mut split = Vec::new();
    for field in &fields {
        if field.contains(',') {
            split.extend(field.split(',').map(ToString::to_string));
        } else {
            split.push(field.clone());
        }
    }
    log::debug!("filter fields: {:?}", split);
    Some(split)
}

// =====================
// Command driving
// =====================

/// Dispatch one parsed invocation against the API.
///
/// Returns `None` when no full `(section, modifier)` was selected, so the
/// caller can print contextual help instead.
pub fn drive_command(
    registry: &EndpointRegistry,
    moo: &MailCow,
    matches: &ArgMatches,
) -> Result<Option<Value>> {
    let Some((section, modifier, leaf)) = collect_operation_path(matches) else {
        return Ok(None);
    };
    let arguments = registry.require_operation(section, modifier)?;
    let values = collect_runtime_values(arguments, leaf);
    log::debug!("runtime values for {} {}: {:?}", modifier, section, values);

    let data = match modifier {
        Modifier::Delete => moo.delete_request(section, &values.string_list("items"))?,
        Modifier::Get => {
            let path = resolve_get_path(registry, section, &values)?;
            moo.get_request(&path)?
        }
        Modifier::Add => {
            let attributes = assemble_attributes(registry, section, modifier, &values)?;
            // /api/v1/add/transport/all is the one add endpoint with a divergent URI
            let target = if section == "transport" {
                "transport/all"
            } else {
                section
            };
            moo.add_request(target, &attributes)?
        }
        Modifier::Edit => {
            // /api/v1/edit/mailq is the one edit endpoint with a divergent payload
            if section == "mailq" && values.is_true("flush") {
                moo.edit_request(section, None, None, Some("flush"))?
            } else {
                let attributes = assemble_attributes(registry, section, modifier, &values)?;
                let items = values.string_list("items");
                moo.edit_request(
                    section,
                    (!items.is_empty()).then_some(items),
                    (!attributes.is_empty()).then_some(attributes),
                    None,
                )?
            }
        }
    };

    Ok(Some(data))
}

// =====================
// argv pre-scanning
// =====================

/// Find the value of `key` in raw argv, before clap has a chance to run.
///
/// Needed for options the command tree itself depends on (the configuration
/// and schema files).
#[must_use]
pub fn pre_scan_value(args: &[String], key: &str) -> Option<String> {
    for i in 0..args.len() {
        if args[i] == key && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        if let Some(rest) = args[i].strip_prefix(&(key.to_string() + "=")) {
            return Some(rest.to_string());
        }
    }
    None
}

/// Whether a presence flag appears in raw argv.
#[must_use]
pub fn pre_scan_flag(args: &[String], long: &str, short: Option<&str>) -> bool {
    args.iter()
        .any(|arg| arg == long || short.is_some_and(|s| arg == s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_registry;

    const SCHEMA_YAML: &str = r#"
paths:
  /api/v1/add/alias:
    post:
      requestBody:
        content:
          application/json:
            schema:
              properties:
                address: {type: string, description: "alias address"}
                goto: {type: string}
                active: {type: number}
  /api/v1/edit/alias:
    post:
      requestBody:
        content:
          application/json:
            schema:
              properties:
                items: {type: array}
                attr:
                  type: object
                  properties:
                    address: {type: string}
                    active: {type: boolean}
  /api/v1/get/alias/{id}:
    get:
      parameters:
        - in: path
          name: id
          schema: {type: number}
  /api/v1/get/syncjobs/all/no_log:
    get:
      parameters: []
  /api/v1/add/tls-policy-map:
    post:
      requestBody:
        content:
          application/json:
            schema:
              properties:
                policy: {type: string, enum: ["none", "dane", "dane-only"]}
"#;

    fn registry() -> EndpointRegistry {
        let document: Value = serde_yaml::from_str(SCHEMA_YAML).unwrap();
        build_registry(&document).unwrap()
    }

    // ==================== build_cli tests ====================

    #[test]
    fn test_build_cli_creates_section_and_modifier_commands() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let alias = app
            .get_subcommands()
            .find(|c| c.get_name() == "alias")
            .unwrap();
        let modifiers: Vec<&str> = alias.get_subcommands().map(clap::Command::get_name).collect();
        assert!(modifiers.contains(&"add"));
        assert!(modifiers.contains(&"edit"));
        assert!(modifiers.contains(&"get"));
    }

    #[test]
    fn test_build_cli_adds_global_args() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let arg_names: Vec<&str> = app.get_arguments().map(|a| a.get_id().as_str()).collect();
        assert!(arg_names.contains(&"conf"));
        assert!(arg_names.contains(&"json"));
        assert!(arg_names.contains(&"yaml"));
        assert!(arg_names.contains(&"vertical"));
        assert!(arg_names.contains(&"debug"));
    }

    #[test]
    fn test_boolean_flag_has_negation_companion() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let matches = app
            .try_get_matches_from(["mailcow-cli", "alias", "edit", "--no-active"])
            .unwrap();
        let (section, modifier, leaf) = collect_operation_path(&matches).unwrap();
        assert_eq!(section, "alias");
        assert_eq!(modifier, Modifier::Edit);
        assert!(leaf.get_flag("no-active"));
    }

    #[test]
    fn test_plain_bool_has_no_negation() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let result =
            app.try_get_matches_from(["mailcow-cli", "syncjobs", "get", "--no-all"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_enum_flag_rejects_unknown_value() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let result = app.try_get_matches_from([
            "mailcow-cli",
            "tls-policy-map",
            "add",
            "--policy",
            "everything",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_enum_flag_accepts_listed_value() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let matches = app
            .try_get_matches_from(["mailcow-cli", "tls-policy-map", "add", "--policy", "dane"])
            .unwrap();
        let (_, _, leaf) = collect_operation_path(&matches).unwrap();
        assert_eq!(leaf.get_one::<String>("policy").unwrap(), "dane");
    }

    #[test]
    fn test_number_flag_parses_integer() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let matches = app
            .try_get_matches_from(["mailcow-cli", "alias", "get", "--id", "42"])
            .unwrap();
        let (_, _, leaf) = collect_operation_path(&matches).unwrap();
        assert_eq!(leaf.get_one::<i64>("id"), Some(&42));
    }

    #[test]
    fn test_number_flag_rejects_text() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let result =
            app.try_get_matches_from(["mailcow-cli", "alias", "get", "--id", "pony"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_items_flag_is_repeatable() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let matches = app
            .try_get_matches_from([
                "mailcow-cli", "alias", "edit", "--items", "5", "--items", "7",
            ])
            .unwrap();
        let (_, _, leaf) = collect_operation_path(&matches).unwrap();
        let items: Vec<&String> = leaf.get_many::<String>("items").unwrap().collect();
        assert_eq!(items, ["5", "7"]);
    }

    #[test]
    fn test_get_commands_accept_fields() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let matches = app
            .try_get_matches_from([
                "mailcow-cli", "alias", "get", "--fields", "address,goto",
            ])
            .unwrap();
        let (_, _, leaf) = collect_operation_path(&matches).unwrap();
        assert!(leaf.get_many::<String>("fields").is_some());
    }

    // ==================== collect_runtime_values tests ====================

    #[test]
    fn test_collect_values_boolean_set() {
        let registry = registry();
        let app = build_cli(&registry, "/tmp/config.toml");
        let matches = app
            .try_get_matches_from(["mailcow-cli", "alias", "edit", "--active"])
            .unwrap();
        let (section, modifier, leaf) = collect_operation_path(&matches).unwrap();
        let arguments = registry.operation(section, modifier).unwrap();
        let values = collect_runtime_values(arguments, leaf);
        assert!(values.is_true("active"));
        assert!(!values.is_negated("active"));
    }

    #[test]
    fn test_collect_values_boolean_negated() {
        let registry = registry();
        let app = build_cli(&registry, "/tmp/config.toml");
        let matches = app
            .try_get_matches_from(["mailcow-cli", "alias", "edit", "--no-active"])
            .unwrap();
        let (section, modifier, leaf) = collect_operation_path(&matches).unwrap();
        let arguments = registry.operation(section, modifier).unwrap();
        let values = collect_runtime_values(arguments, leaf);
        assert!(!values.is_true("active"));
        assert!(values.is_negated("active"));
    }

    #[test]
    fn test_collect_values_boolean_unset_stays_absent() {
        let registry = registry();
        let app = build_cli(&registry, "/tmp/config.toml");
        let matches = app
            .try_get_matches_from(["mailcow-cli", "alias", "edit"])
            .unwrap();
        let (section, modifier, leaf) = collect_operation_path(&matches).unwrap();
        let arguments = registry.operation(section, modifier).unwrap();
        let values = collect_runtime_values(arguments, leaf);
        assert_eq!(values.get("active"), None);
        assert!(!values.is_negated("active"));
    }

    #[test]
    fn test_collect_values_repeated_items() {
        let registry = registry();
        let app = build_cli(&registry, "/tmp/config.toml");
        let matches = app
            .try_get_matches_from([
                "mailcow-cli", "alias", "edit", "--items", "5", "--items", "7",
            ])
            .unwrap();
        let (section, modifier, leaf) = collect_operation_path(&matches).unwrap();
        let arguments = registry.operation(section, modifier).unwrap();
        let values = collect_runtime_values(arguments, leaf);
        assert_eq!(values.string_list("items"), ["5", "7"]);
    }

    #[test]
    fn test_collect_values_number() {
        let registry = registry();
        let app = build_cli(&registry, "/tmp/config.toml");
        let matches = app
            .try_get_matches_from(["mailcow-cli", "alias", "get", "--id", "9"])
            .unwrap();
        let (section, modifier, leaf) = collect_operation_path(&matches).unwrap();
        let arguments = registry.operation(section, modifier).unwrap();
        let values = collect_runtime_values(arguments, leaf);
        assert_eq!(values.get("id"), Some(&Value::from(9)));
    }

    // ==================== parse_fields tests ====================

    #[test]
    fn test_parse_fields_splits_commas() {
        let fields = parse_fields(Some(vec!["address,goto".to_string()]), false);
        assert_eq!(
            fields,
            Some(vec!["address".to_string(), "goto".to_string()])
        );
    }

    #[test]
    fn test_parse_fields_mixed_usage() {
        let fields = parse_fields(
            Some(vec!["address".to_string(), "goto,active".to_string()]),
            false,
        );
        assert_eq!(
            fields,
            Some(vec![
                "address".to_string(),
                "goto".to_string(),
                "active".to_string()
            ])
        );
    }

    #[test]
    fn test_parse_fields_vertical_skips_splitting() {
        let fields = parse_fields(Some(vec!["address,goto".to_string()]), true);
        assert_eq!(fields, Some(vec!["address,goto".to_string()]));
    }

    #[test]
    fn test_parse_fields_none() {
        assert_eq!(parse_fields(None, false), None);
    }

    // ==================== pre-scan tests ====================

    #[test]
    fn test_pre_scan_value_space_separated() {
        let args = vec![
            "mailcow-cli".to_string(),
            "--conf".to_string(),
            "/tmp/c.toml".to_string(),
        ];
        assert_eq!(
            pre_scan_value(&args, "--conf"),
            Some("/tmp/c.toml".to_string())
        );
    }

    #[test]
    fn test_pre_scan_value_equals_separated() {
        let args = vec!["mailcow-cli".to_string(), "--conf=/tmp/c.toml".to_string()];
        assert_eq!(
            pre_scan_value(&args, "--conf"),
            Some("/tmp/c.toml".to_string())
        );
    }

    #[test]
    fn test_pre_scan_value_missing() {
        let args = vec!["mailcow-cli".to_string(), "alias".to_string()];
        assert_eq!(pre_scan_value(&args, "--conf"), None);
    }

    #[test]
    fn test_pre_scan_value_at_end_without_value() {
        let args = vec!["mailcow-cli".to_string(), "--conf".to_string()];
        assert_eq!(pre_scan_value(&args, "--conf"), None);
    }

    #[test]
    fn test_pre_scan_flag_long_and_short() {
        let args = vec!["mailcow-cli".to_string(), "-d".to_string()];
        assert!(pre_scan_flag(&args, "--debug", Some("-d")));
        assert!(!pre_scan_flag(&args, "--json", Some("-j")));
    }

    // ==================== collect_operation_path tests ====================

    #[test]
    fn test_collect_operation_path_none_without_modifier() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let matches = app.try_get_matches_from(["mailcow-cli", "alias"]).unwrap();
        assert!(collect_operation_path(&matches).is_none());
    }

    #[test]
    fn test_collect_operation_path_none_without_section() {
        let app = build_cli(&registry(), "/tmp/config.toml");
        let matches = app.try_get_matches_from(["mailcow-cli"]).unwrap();
        assert!(collect_operation_path(&matches).is_none());
    }
}
