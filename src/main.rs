use powtr_code::attributes::AttributeList;
use powtr_code::config::{Config, DEFAULT_CONFIG_PATH};
use powtr_code::heuristics::{self, AttributeMap, Classifier};
use powtr_code::nameplate_db::NameplateStore;
use powtr_code::table::Table;
use powtr_code::vision::GeminiClient;
use powtr_code::{loader, pipeline};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: powtr_code <command> [args]

commands:
  extract <image-or-dir>... [--out FILE]   read nameplates, code them, export long CSV
  code <json-file>                         print the code for one attribute JSON file
  validate <csv> [--out FILE]              audit existing codes in a table
  load <validated-csv> [--out FILE]        build asset-loader rows from a report
  stats                                    show result store counts
  set-key <api-key>                        store the Gemini API key in the config file

config: $POWTR_CONFIG or .config/powtr.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path =
        std::env::var("POWTR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        eprintln!("{USAGE}");
        return Err("missing command".into());
    };

    match command.as_str() {
        "extract" => cmd_extract(&config_path, rest).await,
        "code" => cmd_code(&config_path, rest),
        "validate" => cmd_validate(&config_path, rest),
        "load" => cmd_load(&config_path, rest),
        "stats" => cmd_stats(&config_path),
        "set-key" => cmd_set_key(&config_path, rest),
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => {
            eprintln!("{USAGE}");
            Err(format!("unknown command: {other}").into())
        }
    }
}

/// Positional arguments plus an optional `--out FILE`.
fn split_out(args: &[String]) -> Result<(Vec<&str>, Option<PathBuf>), Box<dyn std::error::Error>> {
    let mut positional = Vec::new();
    let mut out = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--out" || arg == "-o" {
            let path = iter.next().ok_or("--out needs a file name")?;
            out = Some(PathBuf::from(path));
        } else {
            positional.push(arg.as_str());
        }
    }
    Ok((positional, out))
}

fn write_output(table: &Table, out: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match out {
        Some(path) => table.write_csv(path),
        None => Ok(table.to_writer(std::io::stdout().lock())?),
    }
}

fn classifier_for(cfg: &Config) -> Result<Classifier, Box<dyn std::error::Error>> {
    Ok(Classifier::new(cfg.heuristics.classifier_defaults()?))
}

fn attribute_list_for(cfg: &Config) -> Result<Option<AttributeList>, Box<dyn std::error::Error>> {
    cfg.attribute_list.as_deref().map(|p| AttributeList::load(p)).transpose()
}

fn open_store(cfg: &Config) -> Result<NameplateStore, Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(&cfg.db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(NameplateStore::new(&cfg.db_path)?)
}

async fn cmd_extract(config_path: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let (inputs, out) = split_out(args)?;
    if inputs.is_empty() {
        return Err("extract needs at least one image or directory".into());
    }

    let cfg = Config::load_or_default(config_path)?;
    let classifier = classifier_for(&cfg)?;
    let attributes = attribute_list_for(&cfg)?;
    let inputs: Vec<PathBuf> = inputs.into_iter().map(PathBuf::from).collect();
    let images = pipeline::collect_images(&inputs)?;
    if images.is_empty() {
        return Err("no .jpg, .jpeg or .png images found".into());
    }

    let store = open_store(&cfg)?;
    let model = GeminiClient::from_config(&cfg.vision)?;
    let outcomes =
        pipeline::run_extraction(&model, &store, &classifier, attributes.as_ref(), &images)
            .await?;

    write_output(&pipeline::long_table(&outcomes), out.as_deref())
}

fn cmd_code(config_path: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let [path] = args else {
        return Err("usage: code <json-file>".into());
    };

    let cfg = Config::load_or_default(config_path)?;
    let classifier = classifier_for(&cfg)?;
    let attributes = attribute_list_for(&cfg)?;

    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let obj = value
        .as_object()
        .ok_or_else(|| format!("{path}: expected a JSON object"))?;
    let map = AttributeMap::from_json_object(obj, |key| match &attributes {
        Some(list) => list.resolve_key(key),
        None => key.to_string(),
    });

    let derivation = classifier.derive(&map);
    info!(
        kv = ?derivation.voltage.kv,
        source = ?derivation.voltage.source,
        candidates = derivation.voltage.candidates.len(),
        phase = ?derivation.phase,
        band = ?derivation.band,
        insulation = ?derivation.insulation,
        tap = ?derivation.tap,
        "Derivation"
    );
    println!("{}", derivation.code);
    Ok(())
}

fn cmd_validate(config_path: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let (inputs, out) = split_out(args)?;
    let [input] = inputs.as_slice() else {
        return Err("usage: validate <csv> [--out FILE]".into());
    };

    let cfg = Config::load_or_default(config_path)?;
    let classifier = classifier_for(&cfg)?;
    let table = Table::read_csv(input)?;
    let (report, _summary) = heuristics::validate_table(&table, &classifier);
    write_output(&report, out.as_deref())
}

fn cmd_load(config_path: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let (inputs, out) = split_out(args)?;
    let [input] = inputs.as_slice() else {
        return Err("usage: load <validated-csv> [--out FILE]".into());
    };

    let cfg = Config::load_or_default(config_path)?;
    let attributes = attribute_list_for(&cfg)?;
    let report = Table::read_csv(input)?;
    let rows = loader::build_loader_rows(&report, attributes.as_ref(), &cfg.loader.site_id);
    write_output(&loader::loader_table(&rows), out.as_deref())
}

fn cmd_stats(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::load_or_default(config_path)?;
    let store = open_store(&cfg)?;
    let (total, coded, errored) = store.get_counts()?;
    info!(total, coded, errored, db_path = %cfg.db_path, "Database statistics");
    println!("total: {total}\ncoded: {coded}\nerrored: {errored}");
    Ok(())
}

fn cmd_set_key(config_path: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let [key] = args else {
        return Err("usage: set-key <api-key>".into());
    };
    Config::update_api_key(config_path, key)?;
    info!(path = %config_path, "API key updated");
    Ok(())
}
