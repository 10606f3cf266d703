use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::info;

use gob_core::config::{self, CONFIG_FILE_NAME, GobConfig, OutputFormat};
use gob_core::openapi::{self, spec::OpenApiSpec};
use gob_core::transform::{build_document, operations_from_document, remove_custom_properties};
use gob_core::{Compilation, CompileError, Compiler};

#[derive(Parser)]
#[command(name = "gob", about = "Publish GraphQL operations as an OpenAPI 3.0 API", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the annotated operations and write the API document
    Generate {
        /// GraphQL schema (SDL); defaults to the configured one
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// GraphQL document with the annotated operations
        #[arg(short, long)]
        document: Option<PathBuf>,

        /// Where to write the API document
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check the annotated operations without writing anything
    Validate {
        #[arg(short, long)]
        schema: Option<PathBuf>,

        #[arg(short, long)]
        document: Option<PathBuf>,

        /// Check a written API document instead: every operation must still
        /// carry its GraphQL source
        #[arg(long, conflicts_with_all = ["schema", "document"])]
        api: Option<PathBuf>,
    },

    /// Print a summary of the compiled operation table
    Inspect {
        #[arg(short, long)]
        schema: Option<PathBuf>,

        #[arg(short, long)]
        document: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "yaml")]
        format: InspectFormat,
    },

    /// Initialize a new gob configuration
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Clone, ValueEnum)]
enum InspectFormat {
    Yaml,
    Json,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            schema,
            document,
            output,
        } => cmd_generate(schema, document, output),

        Commands::Validate {
            schema,
            document,
            api,
        } => match api {
            Some(api) => cmd_validate_api(api),
            None => cmd_validate(schema, document),
        },

        Commands::Inspect {
            schema,
            document,
            format,
        } => cmd_inspect(schema, document, format),

        Commands::Init { force } => cmd_init(force),

        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            clap_complete::generate(shell, &mut cmd, "gob", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Try to load the project config file from the current directory.
fn try_load_config() -> Result<Option<GobConfig>> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);
    config::load_config(&config_path).map_err(|e| anyhow::anyhow!(e))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Compile the schema and document named on the command line or in the config.
fn compile(
    cfg: &GobConfig,
    schema: Option<PathBuf>,
    document: Option<PathBuf>,
) -> Result<Compilation> {
    let schema_path = schema.unwrap_or_else(|| PathBuf::from(&cfg.schema));
    let document_path = document.unwrap_or_else(|| PathBuf::from(&cfg.document));
    let sdl = read(&schema_path)?;
    let source = read(&document_path)?;

    let compiler = Compiler::from_sdl(&sdl, &schema_path.display().to_string())?
        .with_scalars(cfg.scalar_schemas());
    match compiler.compile_str(&source, &document_path.display().to_string()) {
        Ok(compilation) => Ok(compilation),
        Err(CompileError::Validation(errors)) => {
            for error in &errors.errors {
                eprintln!("  {error}");
            }
            anyhow::bail!(
                "{} failed validation with {} error(s)",
                document_path.display(),
                errors.len()
            )
        }
        Err(error) => Err(error.into()),
    }
}

fn output_format(cfg: &GobConfig, output: &Path) -> OutputFormat {
    match output.extension().and_then(|e| e.to_str()) {
        Some("json") => OutputFormat::Json,
        Some("yaml" | "yml") => OutputFormat::Yaml,
        _ => cfg.format,
    }
}

fn render(document: &OpenApiSpec, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => openapi::to_yaml(document)?,
        OutputFormat::Json => format!("{}\n", openapi::to_json(document)?),
    })
}

fn cmd_generate(
    schema: Option<PathBuf>,
    document: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let cfg = try_load_config()?.unwrap_or_default();
    let compilation = compile(&cfg, schema, document)?;

    let mut spec = build_document(cfg.base_document(), &compilation);
    if cfg.publish.strip_custom_properties {
        spec = remove_custom_properties(spec);
    }

    let output = output.unwrap_or_else(|| PathBuf::from(&cfg.output));
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let content = render(&spec, output_format(&cfg, &output))?;
    fs::write(&output, content).with_context(|| format!("failed to write {}", output.display()))?;
    info!("wrote {} paths to {}", spec.paths.len(), output.display());

    eprintln!(
        "Generated {} operation(s) and {} component schema(s) in {}",
        compilation.operations.len(),
        compilation.components.len(),
        output.display()
    );
    Ok(())
}

fn cmd_validate(schema: Option<PathBuf>, document: Option<PathBuf>) -> Result<()> {
    let cfg = try_load_config()?.unwrap_or_default();
    let compilation = compile(&cfg, schema, document)?;

    eprintln!("  Operations: {}", compilation.operations.len());
    eprintln!("  Component schemas: {}", compilation.components.len());
    eprintln!("Validation successful.");
    Ok(())
}

fn cmd_validate_api(input: PathBuf) -> Result<()> {
    let content = read(&input)?;
    let document = match input.extension().and_then(|e| e.to_str()) {
        Some("json") => openapi::from_json(&content)?,
        _ => openapi::from_yaml(&content)?,
    };
    let operations = operations_from_document(&document)?;

    eprintln!(
        "Valid OpenAPI {} document: {}",
        document.openapi, document.info.title
    );
    eprintln!("  Paths: {}", document.paths.len());
    eprintln!("  Operations: {}", operations.len());
    eprintln!("Validation successful.");
    Ok(())
}

fn cmd_inspect(
    schema: Option<PathBuf>,
    document: Option<PathBuf>,
    format: InspectFormat,
) -> Result<()> {
    let cfg = try_load_config()?.unwrap_or_default();
    let compilation = compile(&cfg, schema, document)?;

    let summary = build_inspect_summary(&compilation);

    match format {
        InspectFormat::Yaml => {
            let yaml = serde_yaml_ng::to_string(&summary)?;
            print!("{}", yaml);
        }
        InspectFormat::Json => {
            let json = serde_json::to_string_pretty(&summary)?;
            println!("{}", json);
        }
    }

    Ok(())
}

fn build_inspect_summary(compilation: &Compilation) -> serde_json::Value {
    let operations: Vec<serde_json::Value> = compilation
        .operations
        .iter()
        .map(|op| {
            let parameters: Vec<serde_json::Value> = op
                .api_operation()
                .parameters
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.name,
                        "in": p.location.as_str(),
                        "variable": op.variable_for_parameter(&p.name),
                        "required": p.required,
                    })
                })
                .collect();
            serde_json::json!({
                "name": op.name(),
                "method": op.method().as_str(),
                "path": op.path(),
                "parameters": parameters,
                "body": op.request_body_content().map(|content| serde_json::json!({
                    "content_type": content.media_type(),
                    "single_input": op.request_body_is_single_input(),
                    "variables": op.request_body_variable_map(),
                })),
                "tags": op.api_operation().tags,
            })
        })
        .collect();

    serde_json::json!({
        "operations": operations,
        "components": compilation.components.keys().collect::<Vec<_>>(),
    })
}

fn cmd_init(force: bool) -> Result<()> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);

    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        );
    }

    fs::write(&config_path, config::default_config_content())?;
    eprintln!("Created {}", config_path.display());
    Ok(())
}
