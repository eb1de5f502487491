use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use moolib::schema::build_registry;
use moolib::{cli, config, MailCow, OutputFormat};

fn main() {
    if let Err(err) = real_main() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    // Logging has to be up before anything else runs; clap only parses after
    // the schema fetch, so the flag is scanned from raw argv.
    let mut builder = env_logger::Builder::from_default_env();
    if cli::pre_scan_flag(&args, "--debug", Some("-d")) {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let conf = cli::pre_scan_value(&args, "--conf")
        .or_else(|| cli::pre_scan_value(&args, "-c"))
        .map(PathBuf::from)
        .unwrap_or_else(config::default_path);

    // Allow creating the example configuration before the command tree (which
    // needs a reachable server) is built.
    if cli::pre_scan_flag(&args, "--create-example-config", None) {
        config::create_example(&conf)?;
        println!("Wrote example configuration to {}", conf.display());
        return Ok(());
    }

    let settings = config::Settings::load(&conf)?;
    let moo = MailCow::connect(&settings, None)?;
    log::debug!("mailcow server: {}", moo.server);
    log::debug!("mailcow server URL: {}", moo.url);

    let document = if let Some(path) = cli::pre_scan_value(&args, "--openapi-file") {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read openapi file: {path}"))?;
        moolib::parse_schema_document(&raw)?
    } else {
        moo.fetch_schema()?
    };
    let registry = build_registry(&document)?;
    if registry.is_empty() {
        log::warn!("the schema yielded no usable endpoints; only global options are available");
    }

    let app = cli::build_cli(&registry, &conf.display().to_string());
    let matches = app.clone().get_matches();

    let Some(data) = cli::drive_command(&registry, &moo, &matches)? else {
        // no full section/modifier selected: print help for the deepest
        // command reached and signal misuse
        let mut context = app;
        if let Some((section, _)) = matches.subcommand() {
            if let Some(sub) = context.find_subcommand(section) {
                context = sub.clone();
            }
        }
        context.print_help()?;
        println!();
        std::process::exit(1);
    };

    if data.is_null() {
        return Ok(());
    }

    let vertical = matches.get_flag("vertical");
    let format = if matches.get_flag("yaml") {
        OutputFormat::Yaml
    } else if matches.get_flag("json") {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let fields = cli::collect_operation_path(&matches)
        .and_then(|(_, _, leaf)| {
            leaf.try_get_many::<String>("fields")
                .ok()
                .flatten()
                .map(|values| values.cloned().collect::<Vec<String>>())
        });
    let fields = cli::parse_fields(fields, vertical);

    println!("{}", moolib::render(&data, format, vertical, fields.as_deref()));
    Ok(())
}
