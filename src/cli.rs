use clap::{Args, Parser, Subcommand};

/// mend — GitHub PR review & fix bot
#[derive(Parser, Debug, Clone)]
#[command(name = "mend", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Path to config file (default: mend.toml when present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Output file for the machine-readable run summary
    #[arg(long, global = true)]
    pub output: Option<String>,

    /// Go through the flow without pushing changes or writing files
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Verification command run after applying a fix
    #[arg(long, global = true)]
    pub verify_command: Option<String>,

    /// Verification timeout in seconds
    #[arg(long, global = true)]
    pub verify_timeout: Option<u64>,

    /// Generator model to use
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Directory with prompt template overrides
    #[arg(long, global = true)]
    pub prompt_dir: Option<String>,
}

/// The PR a command operates on.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Repository owner
    #[arg(long)]
    pub owner: String,

    /// Repository name
    #[arg(long)]
    pub repo: String,

    /// Pull request number
    #[arg(long)]
    pub pr_number: u64,

    /// Path to the checked-out working copy
    #[arg(long)]
    pub repo_path: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Generate fixes for a PR, verify each with tests, push the survivors
    Fix {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Review a PR and post the findings as a comment
    Review {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Run the verification command against the PR's working copy
    Test {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Analyze a PR without posting or mutating anything
    Analyze {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Generate test cases for a PR and write them into the working copy
    Testgen {
        #[command(flatten)]
        target: TargetArgs,
    },
}

impl CliCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CliCommand::Fix { .. } => "fix",
            CliCommand::Review { .. } => "review",
            CliCommand::Test { .. } => "test",
            CliCommand::Analyze { .. } => "analyze",
            CliCommand::Testgen { .. } => "testgen",
        }
    }

    pub fn target(&self) -> &TargetArgs {
        match self {
            CliCommand::Fix { target }
            | CliCommand::Review { target }
            | CliCommand::Test { target }
            | CliCommand::Analyze { target }
            | CliCommand::Testgen { target } => target,
        }
    }
}
