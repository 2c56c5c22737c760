//! Command-line surface: global flags, the `Commands` tree, and the
//! `indicatif`-based progress reporter reused for paginated `listIds`
//! draining and batch summary fan-out. Generalized from the teacher's
//! `clap::Parser`/`Subcommand` nesting and its `ProgressReporter`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Rich,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReadFormat {
    Summary,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    View,
    Archive,
    Skip,
    Reply,
    Quit,
}

#[derive(Parser, Debug)]
#[command(name = "mail")]
#[command(version)]
#[command(about = "Gmail CLI: read, search, send, and run triage workflows", long_about = None)]
pub struct Cli {
    /// Output rendering: human-readable or a single JSON document on stdout
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Rich)]
    pub output_format: OutputFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate (if needed) and print the connected account address
    Verify,

    /// Print the config root, style/group counts, and open workflow sessions
    Status,

    /// List message ids/summaries from a folder
    List {
        #[arg(long)]
        folder: Option<String>,
        #[arg(long, default_value_t = 50)]
        max: u32,
        #[arg(long)]
        page_token: Option<String>,
    },

    /// Fetch a single message
    Read {
        message_id: String,
        #[arg(long, value_enum, default_value_t = ReadFormat::Summary)]
        format: ReadFormat,
    },

    /// Fetch every message in a thread
    Thread { message_id: String },

    /// Search with a raw Gmail query
    Search {
        query: String,
        #[arg(long, default_value_t = 50)]
        max: u32,
    },

    /// Compose and send a new message
    Send {
        #[arg(long = "to", required = true)]
        to: Vec<String>,
        #[arg(long = "cc")]
        cc: Vec<String>,
        #[arg(long = "bcc")]
        bcc: Vec<String>,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
        #[arg(long = "attachment")]
        attachment: Vec<PathBuf>,
        #[arg(long)]
        style: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        yolo: bool,
    },

    /// Reply to an existing message
    Reply {
        message_id: String,
        #[arg(short, long)]
        body: String,
        #[arg(long)]
        yolo: bool,
    },

    /// Address group management
    Groups {
        #[command(subcommand)]
        command: GroupsCommand,
    },

    /// Reply-style document management
    Styles {
        #[command(subcommand)]
        command: StylesCommand,
    },

    /// Saved query / triage session management
    Workflows {
        #[command(subcommand)]
        command: WorkflowsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum GroupsCommand {
    List,
    Show { name: String },
    Create {
        name: String,
        #[arg(long = "emails")]
        emails: Vec<String>,
        #[arg(long = "json-input-path")]
        json_input_path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    Add { name: String, email: String },
    Remove {
        name: String,
        email: String,
        #[arg(long)]
        force: bool,
    },
    Delete {
        name: String,
        #[arg(long)]
        force: bool,
    },
    Validate { name: Option<String> },
}

#[derive(Subcommand, Debug)]
pub enum StylesCommand {
    List,
    Show { name: String },
    Create {
        name: String,
        #[arg(long)]
        skip_validation: bool,
    },
    Edit {
        name: String,
        #[arg(long)]
        skip_validation: bool,
    },
    Delete {
        name: String,
        #[arg(long)]
        force: bool,
    },
    Validate {
        name: String,
        #[arg(long)]
        fix: bool,
    },
    ValidateAll {
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkflowsCommand {
    List,
    Show { name: String },
    Create {
        name: String,
        #[arg(long)]
        query: String,
        #[arg(long)]
        auto_mark_read: bool,
        #[arg(long)]
        description: Option<String>,
    },
    Delete { name: String },
    Start { name: String },
    Continue {
        token: String,
        action: ActionArg,
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Interactive driver over `start`/`continue` for a terminal session
    Run { name: String },
    Cleanup,
}

/// Progress reporter for paginated draining and batch fan-out, kept from the
/// teacher verbatim. UX only; `--output-format json` callers never construct one.
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap()
            .progress_chars("##-");

        Self {
            multi: MultiProgress::new(),
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
