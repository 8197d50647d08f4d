//! corax - terminal coding agent.
//!
//! Thin CLI over `corax-core`: loads configuration, wires the provider,
//! tool registry, and driver together, runs one prompt to completion, and
//! mediates approval decisions for privileged shell commands.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use corax_core::agent::{AgentDriver, RunOutcome};
use corax_core::config::CoraxConfig;
use corax_core::llm::{ThinkingSink, create_provider};
use corax_core::mcp::{McpClient, McpToolManager};
use corax_core::tools::fs::validate::validator_from_config;
use corax_core::tools::{
    CompositeToolManager, FilesystemToolProvider, FsState, LocalToolManager, ShellTool,
    ToolManager,
};
use corax_core::transcript::FileHistoryRepository;

mod prompts;

#[derive(Parser, Debug)]
#[command(name = "corax", version, about = "Terminal coding agent", long_about = None)]
struct Cli {
    /// The task to run.
    prompt: Vec<String>,

    /// Workspace directory (defaults to the current directory).
    #[arg(long, short = 'C')]
    workspace: Option<PathBuf>,

    /// Config file path (defaults to <workspace>/corax.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured provider (anthropic, openai, ollama).
    #[arg(long)]
    provider: Option<String>,

    /// Override the configured model.
    #[arg(long)]
    model: Option<String>,

    /// Attach an image to the prompt (path, repeatable).
    #[arg(long)]
    image: Vec<PathBuf>,

    /// Print streamed thinking to stderr.
    #[arg(long)]
    show_thinking: bool,

    /// Approve every privileged tool call without asking.
    #[arg(long)]
    yes: bool,

    /// Save the finished transcript as JSON lines to this path.
    #[arg(long)]
    history: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CORAX_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };

    let mut config = match &cli.config {
        Some(path) => CoraxConfig::load(path)?,
        None => CoraxConfig::load_from_workspace(&workspace)?,
    };
    if let Some(provider) = &cli.provider {
        config.provider.name = provider.clone();
    }
    if let Some(model) = &cli.model {
        config.provider.model = Some(model.clone());
    }

    let prompt = cli.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("no prompt given; usage: corax \"<task>\"");
    }

    let images = load_images(&cli.image)?;
    let provider = create_provider(&config.provider)?;
    debug!(
        provider = provider.name(),
        model = provider.model_id(),
        "provider ready"
    );

    // Built-in tools: filesystem family plus the shell executor.
    let mut fs_state = FsState::new(workspace.clone(), &config.filesystem);
    if let Some(validator) = validator_from_config(
        &config.filesystem.validate_extensions,
        &config.filesystem.validate_command,
    )? {
        fs_state = fs_state.with_validator(Arc::new(validator));
    }
    let filesystem = Arc::new(FilesystemToolProvider::with_state(Arc::new(fs_state)));
    let shell_manager = Arc::new(LocalToolManager::new());
    shell_manager.register_tool(Arc::new(ShellTool::new(workspace.clone(), &config.shell)));

    let mut managers: Vec<Arc<dyn ToolManager>> = vec![filesystem, shell_manager];

    // Remote tools from configured MCP servers, when enabled.
    if config.mcp.enabled {
        let mcp_client = Arc::new(McpClient::new(&config.mcp));
        mcp_client.initialize(&config.mcp).await?;
        managers.push(Arc::new(McpToolManager::new(mcp_client)));
    }

    let registry = Arc::new(CompositeToolManager::new(managers));
    let mut driver = AgentDriver::new(provider, registry, config.agent.clone());
    driver.set_system_prompt(prompts::default_system_prompt(&workspace));

    if cli.show_thinking {
        let (sink, mut rx) = ThinkingSink::channel();
        driver.set_thinking_sink(sink);
        tokio::spawn(async move {
            while let Some(fragment) = rx.recv().await {
                if fragment.is_empty() {
                    eprintln!();
                } else {
                    eprint!("{fragment}");
                }
            }
        });
    }

    let mut outcome = driver.run(&prompt, images).await?;
    loop {
        match outcome {
            RunOutcome::Completed { message } => {
                println!("{}", message.content);
                break;
            }
            RunOutcome::WaitingForApproval { call } => {
                let approved = cli.yes || ask_approval(&call.name, &call.arguments)?;
                outcome = if approved {
                    driver.resume().await?
                } else {
                    driver.cancel_pending().await?
                };
            }
        }
    }

    if let Some(path) = cli.history {
        let repository = FileHistoryRepository::new(path);
        driver.transcript().save(&repository).await?;
    }
    Ok(())
}

fn load_images(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|path| {
            corax_core::utils::image_processing::load_and_fit(path)
                .map(|image| image.base64_data)
                .with_context(|| format!("failed to load image {}", path.display()))
        })
        .collect()
}

fn ask_approval(tool: &str, arguments: &serde_json::Map<String, serde_json::Value>) -> Result<bool> {
    let detail = arguments
        .get("command")
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| serde_json::Value::Object(arguments.clone()).to_string());
    eprint!("\n{tool} wants to run:\n  {detail}\nAllow? [y/N] ");
    std::io::stderr().flush().ok();

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("failed to read approval answer")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
