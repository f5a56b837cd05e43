use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use inquest_runtime::config::{expand_tilde, load_config, load_config_from_path};
use inquest_runtime::{Coordinator, InquestConfig, ProviderCatalog, ReadOnlyRecording, RecordingStore, Runtime, load_recording_file};
use inquest_types::{Asset, ConnectRequest, ConnectionConfig, Primitive, RawData};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => load_config_from_path(&expand_tilde(path)),
        None => load_config(),
    }
    .context("failed to load configuration")?;

    match matches.subcommand() {
        Some(("providers", _)) => list_providers(&config),
        Some(("query", sub)) => run_query(&config, sub).await,
        _ => bail!("expected a subcommand, see --help"),
    }
}

fn init_tracing() {
    // stdout is reserved for query output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let query = Command::new("query")
        .about("Read fields of one resource on an asset")
        .arg(
            Arg::new("asset")
                .long("asset")
                .value_name("FILE")
                .help("JSON file describing the asset")
                .conflicts_with("connection"),
        )
        .arg(
            Arg::new("connection")
                .long("connection")
                .value_name("TYPE")
                .help("Connection type of an ad-hoc asset, e.g. local or ssh"),
        )
        .arg(Arg::new("host").long("host").value_name("HOST").requires("connection"))
        .arg(Arg::new("provider").long("provider").value_name("ID").help("Primary provider id; detected when omitted"))
        .arg(Arg::new("resource").long("resource").required(true).value_name("NAME"))
        .arg(
            Arg::new("arg")
                .long("arg")
                .value_name("KEY=VALUE")
                .action(ArgAction::Append)
                .help("Argument used to create the resource"),
        )
        .arg(Arg::new("field").long("field").required(true).action(ArgAction::Append))
        .arg(
            Arg::new("record")
                .long("record")
                .value_name("FILE")
                .conflicts_with("replay")
                .help("Write every fetched value to a recording file"),
        )
        .arg(
            Arg::new("replay")
                .long("replay")
                .value_name("FILE")
                .help("Answer only from a recording file, never from providers"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_parser(["json", "yaml"])
                .default_value("json"),
        );

    Command::new("inquest")
        .about("Query asset resources through pluggable providers")
        .arg_required_else_help(true)
        .arg(Arg::new("config").long("config").global(true).value_name("FILE"))
        .subcommand(Command::new("providers").about("List installed providers"))
        .subcommand(query)
}

fn list_providers(config: &InquestConfig) -> Result<()> {
    let catalog = ProviderCatalog::load(&config.provider_dirs());
    let providers = catalog.list();
    if providers.is_empty() {
        println!("no providers installed in {}", config.provider_paths.join(", "));
        return Ok(());
    }
    for provider in providers {
        println!("{:<12} {:<10} {:<40} {}", provider.name, provider.version, provider.id, provider.connection_types.join(","));
    }
    Ok(())
}

async fn run_query(config: &InquestConfig, matches: &ArgMatches) -> Result<()> {
    let coordinator = Arc::new(Coordinator::from_config(config));
    let runtime = coordinator.runtime();
    configure_recording(&runtime, config, matches)?;

    let result = query(&runtime, matches).await;
    runtime.close().await;
    coordinator.shutdown().await;
    let values = result?;

    let output = match matches.get_one::<String>("output").map(String::as_str) {
        Some("yaml") => serde_yaml::to_string(&values)?,
        _ => serde_json::to_string_pretty(&values)?,
    };
    println!("{output}");
    Ok(())
}

async fn query(runtime: &Runtime, matches: &ArgMatches) -> Result<BTreeMap<String, RawData>> {
    let mut asset = asset_from_args(matches)?;
    match matches.get_one::<String>("provider") {
        Some(provider) => runtime.use_provider(provider).await?,
        None => runtime.detect_provider(&mut asset).await?,
    }
    runtime
        .connect(ConnectRequest {
            asset: Some(asset),
            ..ConnectRequest::default()
        })
        .await?;

    let name = matches.get_one::<String>("resource").context("--resource is required")?;
    let args = matches
        .get_many::<String>("arg")
        .into_iter()
        .flatten()
        .map(|pair| parse_arg(pair))
        .collect::<Result<BTreeMap<_, _>>>()?;
    let resource = runtime
        .create_resource(name, args)
        .await
        .with_context(|| format!("failed to create {name}"))?;
    debug!(resource = %resource, "resource created");

    let mut values = BTreeMap::new();
    for field in matches.get_many::<String>("field").into_iter().flatten() {
        let raw = runtime.read_field(&resource, field).await?;
        if let Some(error) = &raw.error {
            warn!(field = %field, error = %error, "field could not be computed");
        }
        values.insert(field.clone(), raw);
    }
    Ok(values)
}

fn configure_recording(runtime: &Runtime, config: &InquestConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(path) = matches.get_one::<String>("replay") {
        let recording = load_recording_file(&expand_tilde(path)).with_context(|| format!("failed to load recording {path}"))?;
        runtime.set_recording(Arc::new(ReadOnlyRecording::from(recording)));
        return Ok(());
    }
    if let Some(path) = matches.get_one::<String>("record") {
        runtime.set_recording(Arc::new(RecordingStore::with_path(expand_tilde(path))));
        return Ok(());
    }

    let Some(path) = &config.recording.path else {
        return Ok(());
    };
    let path = expand_tilde(path);
    if config.recording.read_only {
        let recording = load_recording_file(&path).with_context(|| format!("failed to load recording {}", path.display()))?;
        runtime.set_recording(Arc::new(ReadOnlyRecording::from(recording)));
    } else {
        runtime.set_recording(Arc::new(RecordingStore::with_path(path)));
    }
    Ok(())
}

fn asset_from_args(matches: &ArgMatches) -> Result<Asset> {
    if let Some(path) = matches.get_one::<String>("asset") {
        let text = std::fs::read_to_string(expand_tilde(path)).with_context(|| format!("failed to read asset file {path}"))?;
        return serde_json::from_str(&text).with_context(|| format!("invalid asset file {path}"));
    }

    let connection_type = matches
        .get_one::<String>("connection")
        .context("either --asset or --connection is required")?;
    let host = matches.get_one::<String>("host").cloned().unwrap_or_default();
    let name = if host.is_empty() { connection_type.clone() } else { host.clone() };
    Ok(Asset {
        name,
        connections: vec![ConnectionConfig::new(connection_type.as_str()).with_host(host)],
        ..Asset::default()
    })
}

/// Parses `key=value`. Integers and booleans keep their type.
fn parse_arg(pair: &str) -> Result<(String, Primitive)> {
    let Some((key, value)) = pair.split_once('=') else {
        bail!("argument '{pair}' must have the form key=value");
    };
    if key.is_empty() {
        bail!("argument '{pair}' has an empty key");
    }
    let value = if let Ok(n) = value.parse::<i64>() {
        Primitive::Int(n)
    } else if let Ok(b) = value.parse::<bool>() {
        Primitive::Bool(b)
    } else {
        Primitive::string(value)
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_arguments() {
        assert_eq!(parse_arg("path=/etc/hosts").unwrap(), ("path".into(), Primitive::string("/etc/hosts")));
        assert_eq!(parse_arg("port=22").unwrap(), ("port".into(), Primitive::Int(22)));
        assert_eq!(parse_arg("recursive=true").unwrap(), ("recursive".into(), Primitive::Bool(true)));
        assert_eq!(parse_arg("query=a=b").unwrap(), ("query".into(), Primitive::string("a=b")));
        assert!(parse_arg("novalue").is_err());
        assert!(parse_arg("=x").is_err());
    }

    #[test]
    fn ad_hoc_asset_from_connection_flags() {
        let matches = build_cli().get_matches_from([
            "inquest",
            "query",
            "--connection",
            "ssh",
            "--host",
            "10.0.0.1",
            "--resource",
            "os.file",
            "--field",
            "content",
        ]);
        let (_, sub) = matches.subcommand().unwrap();
        let asset = asset_from_args(sub).unwrap();
        assert_eq!(asset.name, "10.0.0.1");
        assert_eq!(asset.connections[0].connection_type, "ssh");
        assert_eq!(asset.connections[0].host, "10.0.0.1");
    }

    #[test]
    fn record_and_replay_conflict() {
        let result = build_cli().try_get_matches_from([
            "inquest", "query", "--connection", "local", "--resource", "os.file", "--field", "size", "--record", "a.json",
            "--replay", "b.json",
        ]);
        assert!(result.is_err());
    }
}
