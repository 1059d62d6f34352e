use std::io;
use std::process;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};
use orc::commands::ask::{self, AskArgs};
use orc::commands::config::{self, ConfigArgs};
use orc::logging::{self, Verbosity};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit: ",
    env!("ORC_GIT_SHA"),
    ", built: ",
    env!("ORC_BUILD_TS"),
    ")"
);

const ROOT_HELP_EXAMPLES: &str = "Examples:\n  orc ask --resource contoso --deployment chat --retrieval-url http://localhost:7071/api/retrieval \"What is policy X?\"\n  orc ask --profile prod --history history.json --json\n  orc config check --profile prod\n  orc completion bash > ~/.local/share/bash-completion/completions/orc";

const ASK_HELP_EXAMPLES: &str = "Examples:\n  orc ask --profile prod \"What is policy X?\"\n  echo '[{\"role\":\"user\",\"content\":\"Hi there\"}]' | orc ask --profile prod --json\n  orc ask --resource contoso --deployment chat --dry-run --json \"Explain policy X\"";

#[derive(Debug, Parser)]
#[command(
    name = "orc",
    version = VERSION,
    about = "Grounded question answering over Azure OpenAI",
    after_help = ROOT_HELP_EXAMPLES
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Answer the last user turn of a conversation", after_help = ASK_HELP_EXAMPLES)]
    Ask(AskArgs),
    #[command(about = "Manage local config")]
    Config(ConfigArgs),
    #[command(about = "Generate shell completion script")]
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn print_completion(shell: CompletionShell) {
    let mut cmd = Cli::command();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, "orc", &mut io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "orc", &mut io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, "orc", &mut io::stdout()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbosity = match &cli.command {
        Commands::Ask(args) => args.verbosity(),
        _ => Verbosity::Normal,
    };
    logging::init_tracing(verbosity);

    let result = match cli.command {
        Commands::Ask(args) => ask::run(args).await,
        Commands::Config(args) => config::run(args),
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
