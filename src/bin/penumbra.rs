//! Demo CLI: runs the sync engine against the in-memory driver.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use penumbra::{
    Depth, FieldType, Handle, MemoryDriver, NodeSchema, Object, Registry, RelationField, Session,
    SessionConfig, Target,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "penumbra",
    version,
    about = "Exercise the object-graph sync engine against an in-memory graph",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "PENUMBRA_CONFIG",
        value_name = "FILE",
        help = "Session configuration (TOML)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Save the chain A->B->C<-D->E, then load it back from B")]
    Chain {
        #[arg(long, default_value_t = 2, help = "Load depth in relationship hops")]
        depth: u32,

        #[arg(long, help = "Include every statement issued")]
        statements: bool,
    },

    #[command(about = "Print the effective session configuration")]
    Config,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct ChainReport {
    depth: u32,
    nodes: usize,
    relationships: usize,
    loaded: Vec<StationReport>,
    statements: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StationReport {
    name: String,
    id: Option<i64>,
    next: Vec<String>,
    previous: Vec<String>,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    match cli.command {
        Command::Chain { depth, statements } => {
            let report = chain(config, depth, statements)?;
            emit(cli.format, &report, print_chain_text)
        }
        Command::Config => {
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Text => print!("{}", config.to_toml_string()?),
            }
            Ok(())
        }
    }
}

fn registry() -> penumbra::Result<Registry> {
    let station = || Target::Node("Station".into());
    let mut registry = Registry::new();
    registry.register_node(
        NodeSchema::new("Station")
            .custom_id("name", FieldType::String)
            .relation(RelationField::outgoing("next", station()).rel_type("LINK").many())
            .relation(RelationField::incoming("previous", station()).rel_type("LINK").many()),
    )?;
    Ok(registry)
}

fn link(from: &Handle, to: &Handle) {
    from.push_related("next", to.clone());
    to.push_related("previous", from.clone());
}

fn chain(config: SessionConfig, depth: u32, statements: bool) -> Result<ChainReport, Box<dyn Error>> {
    let driver = MemoryDriver::new();
    let mut session = Session::with_config(driver.clone(), registry()?, config);

    let stations: Vec<Handle> = ["A", "B", "C", "D", "E"]
        .iter()
        .map(|name| Object::new("Station").with_property("name", *name).into_handle())
        .collect();
    let [a, b, c, d, e] = [0, 1, 2, 3, 4].map(|i| stations[i].clone());
    link(&a, &b);
    link(&b, &c);
    link(&d, &c);
    link(&d, &e);
    session.save(&a)?;
    info!(
        nodes = driver.node_count(),
        relationships = driver.relationship_count(),
        "demo.chain.saved"
    );

    session.clear();
    let root = session.load_depth("Station", "B", Depth::Bounded(depth))?;
    let mut loaded = vec![station_report(&root)];
    let mut frontier = vec![root];
    let mut seen: Vec<Handle> = frontier.clone();
    while let Some(station) = frontier.pop() {
        for neighbour in station
            .related_many("next")
            .into_iter()
            .chain(station.related_many("previous"))
        {
            if seen.iter().any(|s| s.ptr_eq(&neighbour)) {
                continue;
            }
            loaded.push(station_report(&neighbour));
            seen.push(neighbour.clone());
            frontier.push(neighbour);
        }
    }
    loaded.sort_by(|l, r| l.name.cmp(&r.name));

    Ok(ChainReport {
        depth,
        nodes: driver.node_count(),
        relationships: driver.relationship_count(),
        loaded,
        statements: if statements {
            driver.statements()
        } else {
            Vec::new()
        },
    })
}

fn name_of(station: &Handle) -> String {
    station
        .property("name")
        .and_then(|name| name.as_str().map(str::to_owned))
        .unwrap_or_default()
}

fn station_report(station: &Handle) -> StationReport {
    let names = |field: &str| {
        let mut names: Vec<String> = station.related_many(field).iter().map(name_of).collect();
        names.sort();
        names
    };
    StationReport {
        name: name_of(station),
        id: station.id().persisted(),
        next: names("next"),
        previous: names("previous"),
    }
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_chain_text(report: &ChainReport) {
    println!(
        "Saved {} nodes and {} relationships; loaded from B at depth {}:",
        report.nodes, report.relationships, report.depth
    );
    for station in &report.loaded {
        println!(
            "  {} next=[{}] previous=[{}]",
            station.name,
            station.next.join(","),
            station.previous.join(",")
        );
    }
    for statement in &report.statements {
        println!("---\n{statement}");
    }
}
