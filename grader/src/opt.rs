use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Build, run and probe HTTP server submissions")]
pub struct Opts {
    #[clap(subcommand)]
    pub cmd: SubCmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCmd {
    /// Grade a batch of submissions, printing one JSON result per line
    #[clap(name = "grade")]
    Grade(GradeSubCmd),

    /// Probe a server that is already running, without any container
    #[clap(name = "probe")]
    Probe(ProbeSubCmd),
}

#[derive(Parser, Debug, Clone)]
pub struct GradeSubCmd {
    /// Repository URLs of the submissions
    pub urls: Vec<String>,

    /// Read more URLs from this file, one per line. Blank lines and lines
    /// starting with `#` are ignored.
    #[clap(long = "url-file", short = 'f')]
    pub url_file: Option<PathBuf>,

    /// Configuration file, defaults to built-in settings
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    /// Folder to check submissions out into
    #[clap(long)]
    pub workspace: Option<PathBuf>,

    /// How many submissions to grade at the same time
    #[clap(long, short = 'j')]
    pub concurrency: Option<usize>,

    /// Docker network to attach submission containers to
    #[clap(long)]
    pub network: Option<String>,

    /// Points awarded for each successful probe
    #[clap(long)]
    pub weight: Option<u32>,

    /// Remove each submission's image after grading it
    #[clap(long)]
    pub remove_image: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeSubCmd {
    /// Base URL of the server, e.g. `http://127.0.0.1:6001`
    #[clap(default_value = "http://127.0.0.1:6001")]
    pub base_url: String,

    /// Configuration file, for probe settings and the probe suite
    #[clap(long, short)]
    pub config: Option<PathBuf>,

    /// Skip waiting for the server to become ready
    #[clap(long)]
    pub no_wait: bool,
}
