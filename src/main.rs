use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use mailmind::config::PipelineConfig;
use mailmind::llm::{LlmConfig, create_provider};
use mailmind::pipeline::{EmailThread, PipelineOrchestrator, ThreadAnalysis};

/// Summarize and classify an email thread, printing the analysis as JSON.
///
/// Input is either an EmailThread JSON object
/// ({"id", "subject", "sender", "body": [...]}) or plain text treated as a
/// single message.
#[derive(Debug, Parser)]
#[command(name = "mailmind", version, about)]
struct Cli {
    /// Thread file to read; stdin when absent or "-".
    file: Option<PathBuf>,

    /// Subject line, overriding any subject in JSON input.
    #[arg(long)]
    subject: Option<String>,

    /// Thread identifier, overriding any id in JSON input.
    #[arg(long = "id", value_name = "THREAD_ID")]
    thread_id: Option<String>,

    /// Treat the input as one email and extract priority, topic and
    /// bill / receipt / shipping details instead.
    #[arg(long)]
    email: bool,
}

fn read_input(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read thread from {}", path.display())),
        _ => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read thread from stdin")?;
            Ok(input)
        }
    }
}

/// JSON threads are taken as-is; anything else is one plain-text message.
fn thread_from_input(input: &str, cli: &Cli) -> EmailThread {
    if let Ok(mut thread) = serde_json::from_str::<EmailThread>(input) {
        if let Some(subject) = &cli.subject {
            thread.subject = subject.clone();
        }
        if let Some(id) = &cli.thread_id {
            thread.id = id.clone();
        }
        return thread;
    }

    EmailThread::new(
        cli.thread_id.clone().unwrap_or_else(|| "stdin".to_string()),
        cli.subject.clone().unwrap_or_default(),
        "",
        vec![input.to_string()],
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let llm_config = LlmConfig::from_env().context("LLM configuration")?;
    let pipeline_config = PipelineConfig::from_env();

    eprintln!("📬 MailMind v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", llm_config.backend.label());
    eprintln!("   Model: {}", llm_config.model);

    let llm = create_provider(&llm_config)?;
    let orchestrator = PipelineOrchestrator::new(llm, pipeline_config);

    let input = read_input(cli.file.as_ref())?;

    if cli.email {
        return match orchestrator.analyze_email(&input).await {
            Ok(insight) => {
                println!("{}", serde_json::to_string_pretty(&insight)?);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("Error: {}", e.user_message());
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let thread = thread_from_input(&input, &cli);
    let result = orchestrator.analyze(&thread).await;
    let failed = result.is_failed();

    let response = ThreadAnalysis::from(result);
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
