//! TenderLens CLI - analyze tender documents from the command line
//!
//! Usage:
//!   tenderlens analyze <FILE> [OPTIONS]
//!   tenderlens compare <FILE> <FILE> [FILE...] [OPTIONS]
//!   tenderlens report <ID> [--format json|html]
//!   tenderlens runs
//!   tenderlens serve [--host HOST] [--port PORT]
//!
//! Options:
//!   --config <PATH>     Configuration file (default: tenderlens.toml if present)
//!   --type <TYPE>       Declared document type: pliego, propuesta, contrato
//!   --level <LEVEL>     Analysis level: basic, comprehensive
//!   --force             Rebuild even when a successful artifact exists
//!   --output <PATH>     Write the result JSON to a file instead of stdout
//!
//! Exit codes: 0 success, 2 usage error, 3 configuration error,
//! 4 analysis failed, 5 dependency unavailable.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tenderlens::api::{start_server, AppState};
use tenderlens::report::ReportAssembler;
use tenderlens::{
    AnalysisConfig, AnalysisContext, AnalysisError, AnalysisLevel, DocType, Orchestrator,
    OverallStatus, RunId,
};
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 2;
const EXIT_CONFIG: u8 = 3;
const EXIT_ANALYSIS: u8 = 4;
const EXIT_DEPENDENCY: u8 = 5;

#[derive(Debug, Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    doc_type: Option<String>,
    level: Option<String>,
    force: bool,
    output: Option<PathBuf>,
    format: String,
    host: String,
    port: u16,
    files: Vec<PathBuf>,
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions {
        format: "json".to_string(),
        host: "127.0.0.1".to_string(),
        port: 8080,
        ..Default::default()
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                options.config_path = Some(PathBuf::from(
                    iter.next().ok_or("--config needs a path")?,
                ));
            }
            "--type" => {
                options.doc_type = Some(iter.next().ok_or("--type needs a value")?.clone());
            }
            "--level" => {
                options.level = Some(iter.next().ok_or("--level needs a value")?.clone());
            }
            "--force" => options.force = true,
            "--output" => {
                options.output = Some(PathBuf::from(
                    iter.next().ok_or("--output needs a path")?,
                ));
            }
            "--format" => {
                options.format = iter.next().ok_or("--format needs a value")?.clone();
            }
            "--host" => {
                options.host = iter.next().ok_or("--host needs a value")?.clone();
            }
            "--port" => {
                options.port = iter
                    .next()
                    .ok_or("--port needs a value")?
                    .parse()
                    .map_err(|_| "--port needs a number")?;
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown option: {}", other));
            }
            file => options.files.push(PathBuf::from(file)),
        }
    }

    Ok(options)
}

fn print_help() {
    println!("TenderLens - construction tender document analysis");
    println!();
    println!("USAGE:");
    println!("    tenderlens analyze <FILE> [OPTIONS]");
    println!("    tenderlens compare <FILE> <FILE> [FILE...] [OPTIONS]");
    println!("    tenderlens report <ID> [--format json|html]");
    println!("    tenderlens runs");
    println!("    tenderlens serve [--host HOST] [--port PORT]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>     Configuration file (json/toml/yaml)");
    println!("    --type <TYPE>       pliego | propuesta | contrato");
    println!("    --level <LEVEL>     basic | comprehensive");
    println!("    --force             Rebuild even when cached");
    println!("    --output <PATH>     Write result to a file");
    println!("    --help, -h          Print this help message");
}

fn load_config(options: &CliOptions) -> Result<AnalysisConfig, String> {
    match &options.config_path {
        Some(path) => AnalysisConfig::from_file(path)
            .map_err(|e| format!("cannot load {}: {}", path.display(), e)),
        None => {
            let default_path = PathBuf::from("tenderlens.toml");
            if default_path.exists() {
                AnalysisConfig::from_file(&default_path).map_err(|e| e.to_string())
            } else {
                Ok(AnalysisConfig::default())
            }
        }
    }
}

/// Map an error to the documented exit codes
fn exit_code_for(error: &AnalysisError) -> u8 {
    match error {
        AnalysisError::Dependency(_) => EXIT_DEPENDENCY,
        AnalysisError::Fatal(tenderlens::error::FatalError::ConfigInvalid(_)) => EXIT_CONFIG,
        _ => EXIT_ANALYSIS,
    }
}

/// A failed artifact exits 5 when a dependency caused it, 4 otherwise
fn exit_code_for_artifact(artifact: &tenderlens::AnalysisArtifact) -> u8 {
    if artifact.overall_status != OverallStatus::Failed {
        return EXIT_OK;
    }
    let dependency_down = artifact.stage_results.values().any(|result| {
        result.errors.iter().any(|e| {
            e.code == "embedding_unavailable" || e.code == "vector_store_unavailable"
        })
    });
    if dependency_down {
        EXIT_DEPENDENCY
    } else {
        EXIT_ANALYSIS
    }
}

fn emit(options: &CliOptions, json: String) -> Result<(), String> {
    match &options.output {
        Some(path) => std::fs::write(path, json).map_err(|e| e.to_string()),
        None => {
            println!("{}", json);
            Ok(())
        }
    }
}

async fn build_orchestrator(config: AnalysisConfig) -> Result<Arc<Orchestrator>, AnalysisError> {
    let ctx = AnalysisContext::initialize(config).await?;
    Ok(Arc::new(Orchestrator::new(Arc::new(ctx))?))
}

async fn cmd_analyze(options: &CliOptions) -> u8 {
    if options.files.len() != 1 {
        eprintln!("analyze expects exactly one file");
        return EXIT_USAGE;
    }

    let config = match load_config(options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return EXIT_CONFIG;
        }
    };

    let orchestrator = match build_orchestrator(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("initialization failed: {}", e);
            return exit_code_for(&e).max(EXIT_CONFIG);
        }
    };

    let declared = options
        .doc_type
        .as_deref()
        .map(DocType::parse)
        .unwrap_or(DocType::Desconocido);
    let level = options
        .level
        .as_deref()
        .map(AnalysisLevel::parse)
        .unwrap_or(AnalysisLevel::Comprehensive);

    let document = match orchestrator.ingest(&options.files[0], declared).await {
        Ok(document) => document,
        Err(e) => {
            eprintln!("ingest failed: {}", e);
            return exit_code_for(&e);
        }
    };

    match orchestrator
        .run_to_completion(document, level, options.force)
        .await
    {
        Ok(artifact) => {
            let json = match serde_json::to_string_pretty(&artifact) {
                Ok(json) => json,
                Err(e) => {
                    eprintln!("serialization failed: {}", e);
                    return EXIT_ANALYSIS;
                }
            };
            if let Err(e) = emit(options, json) {
                eprintln!("output failed: {}", e);
                return EXIT_ANALYSIS;
            }
            exit_code_for_artifact(&artifact)
        }
        Err(e) => {
            eprintln!("analysis failed: {}", e);
            exit_code_for(&e)
        }
    }
}

async fn cmd_compare(options: &CliOptions) -> u8 {
    if options.files.len() < 2 {
        eprintln!("compare expects at least two files");
        return EXIT_USAGE;
    }

    let config = match load_config(options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return EXIT_CONFIG;
        }
    };

    let orchestrator = match build_orchestrator(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("initialization failed: {}", e);
            return exit_code_for(&e).max(EXIT_CONFIG);
        }
    };

    let declared = options
        .doc_type
        .as_deref()
        .map(DocType::parse)
        .unwrap_or(DocType::Desconocido);
    let level = options
        .level
        .as_deref()
        .map(AnalysisLevel::parse)
        .unwrap_or(AnalysisLevel::Comprehensive);

    let mut documents = Vec::with_capacity(options.files.len());
    for file in &options.files {
        match orchestrator.ingest(file, declared).await {
            Ok(document) => documents.push(document),
            Err(e) => {
                eprintln!("ingest of {} failed: {}", file.display(), e);
                return exit_code_for(&e);
            }
        }
    }

    match orchestrator
        .compare_documents(documents, level, options.force)
        .await
    {
        Ok(comparison) => {
            let json = serde_json::to_string_pretty(&comparison).unwrap_or_default();
            if let Err(e) = emit(options, json) {
                eprintln!("output failed: {}", e);
                return EXIT_ANALYSIS;
            }
            EXIT_OK
        }
        Err(e) => {
            eprintln!("comparison failed: {}", e);
            exit_code_for(&e)
        }
    }
}

async fn cmd_report(options: &CliOptions) -> u8 {
    if options.files.len() != 1 {
        eprintln!("report expects exactly one artifact or comparison id");
        return EXIT_USAGE;
    }
    let id = options.files[0].display().to_string();

    let config = match load_config(options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return EXIT_CONFIG;
        }
    };

    let store = match tenderlens::ArtifactStore::new(&config.data_root) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("artifact store error: {}", e);
            return EXIT_CONFIG;
        }
    };

    let assembler = ReportAssembler;
    let bundle = match store.load_artifact(&RunId::from_raw(id.clone())).await {
        Ok(Some(artifact)) => assembler.from_artifact(&artifact),
        Ok(None) => match store.load_comparison(&id).await {
            Ok(Some(comparison)) => assembler.from_comparison(&comparison),
            Ok(None) => {
                eprintln!("no artifact or comparison with id {}", id);
                return EXIT_ANALYSIS;
            }
            Err(e) => {
                eprintln!("load failed: {}", e);
                return exit_code_for(&e);
            }
        },
        Err(e) => {
            eprintln!("load failed: {}", e);
            return exit_code_for(&e);
        }
    };

    let json = serde_json::to_string_pretty(&bundle).unwrap_or_default();
    if let Err(e) = emit(options, json) {
        eprintln!("output failed: {}", e);
        return EXIT_ANALYSIS;
    }
    EXIT_OK
}

async fn cmd_runs(options: &CliOptions) -> u8 {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return EXIT_CONFIG;
        }
    };

    let store = match tenderlens::ArtifactStore::new(&config.data_root) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("artifact store error: {}", e);
            return EXIT_CONFIG;
        }
    };

    match store.list_runs().await {
        Ok(runs) => {
            for run in runs {
                println!("{}", run);
            }
            EXIT_OK
        }
        Err(e) => {
            eprintln!("listing failed: {}", e);
            EXIT_ANALYSIS
        }
    }
}

async fn cmd_serve(options: &CliOptions) -> u8 {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return EXIT_CONFIG;
        }
    };
    let data_root = config.data_root.clone();

    let orchestrator = match build_orchestrator(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("initialization failed: {}", e);
            return EXIT_CONFIG;
        }
    };

    let state = match AppState::new(orchestrator, &data_root) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("cannot prepare upload directory: {}", e);
            return EXIT_CONFIG;
        }
    };

    if let Err(e) = start_server(state, &options.host, options.port).await {
        eprintln!("server failed: {}", e);
        return EXIT_DEPENDENCY;
    }
    EXIT_OK
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_help();
        return ExitCode::from(EXIT_USAGE);
    };

    if command == "--help" || command == "-h" {
        print_help();
        return ExitCode::from(EXIT_OK);
    }

    let options = match parse_options(&args[1..]) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("usage error: {}", e);
            print_help();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let code = match command.as_str() {
        "analyze" => cmd_analyze(&options).await,
        "compare" => cmd_compare(&options).await,
        "report" => cmd_report(&options).await,
        "runs" => cmd_runs(&options).await,
        "serve" => cmd_serve(&options).await,
        other => {
            eprintln!("unknown command: {}", other);
            print_help();
            EXIT_USAGE
        }
    };

    ExitCode::from(code)
}
