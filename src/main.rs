use clap::{Parser, Subcommand};
use http_tool::app::App;
use http_tool::constants::env;
use http_tool::errors::ToolError;
use http_tool::mcp::server::run_stdio;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "http-tool")]
#[command(about = "Declarative HTTP tools for agents (MCP stdio server)", long_about = None)]
struct Cli {
    /// Tool configuration file; falls back to HTTP_TOOL_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve every configured tool over stdio (default).
    Serve,
    /// Print tool definitions as JSON.
    Describe,
    /// Invoke one tool once and print its output.
    Invoke {
        tool: String,
        /// Raw input: JSON or free text.
        input: String,
    },
}

fn resolve_config_path(cli: &Cli) -> Result<PathBuf, ToolError> {
    cli.config
        .clone()
        .or_else(|| {
            std::env::var(env::CONFIG_PATH)
                .ok()
                .filter(|raw| !raw.trim().is_empty())
                .map(PathBuf::from)
        })
        .ok_or_else(|| {
            ToolError::configuration("No tool configuration given")
                .with_hint(format!("Pass --config <file> or set {}", env::CONFIG_PATH))
        })
}

async fn run(cli: Cli) -> Result<(), ToolError> {
    let app = App::initialize(&resolve_config_path(&cli)?)?;
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_stdio(app).await,
        Command::Describe => {
            let defs = app.catalog.definitions();
            println!(
                "{}",
                serde_json::to_string_pretty(&defs)
                    .map_err(|err| ToolError::internal(err.to_string()))?
            );
            Ok(())
        }
        Command::Invoke { tool, input } => {
            let tool = app
                .catalog
                .get(&tool)
                .map_err(|err| ToolError::configuration(err.message))?;
            let input = serde_json::from_str::<Value>(&input).unwrap_or(Value::String(input));
            println!("{}", tool.invoke(input).await);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("http-tool: {}", err);
        if let Some(hint) = err.hint {
            eprintln!("hint: {}", hint);
        }
        std::process::exit(1);
    }
}
