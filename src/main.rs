use clap::{Parser, Subcommand};
use docvault::Result;
use docvault::commands::{
    App, create_project, fetch_page, list_documents, list_projects, process, query, run_worker,
    show_job, upload,
};
use docvault::config::{Config, get_config_dir, init_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docvault")]
#[command(about = "Turn project document collections into vector indexes and query them")]
#[command(version)]
struct Cli {
    /// Data directory holding config.toml, the database, documents and indexes
    /// (defaults to $DOCVAULT_HOME, then the platform config directory)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    /// Numeric id of the acting user
    #[arg(long, global = true, default_value_t = 1)]
    user: i64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Write a default config.toml if none exists
        #[arg(long)]
        init: bool,
    },
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Copy local documents into a project
    Upload {
        /// Project ID
        project: i64,
        /// Files to upload (.pdf, .html, .htm, .txt, .md)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Download a web page into a project
    Fetch {
        /// Project ID
        project: i64,
        /// Page URL
        url: String,
    },
    /// List the documents of a project
    Documents {
        /// Project ID
        project: i64,
    },
    /// Queue a rebuild of a project's index
    Process {
        /// Project ID
        project: i64,
        /// Run the job in this process and wait for the result
        #[arg(long)]
        wait: bool,
    },
    /// Run queued build jobs
    Worker {
        /// Exit once the queue is empty
        #[arg(long)]
        once: bool,
    },
    /// Show the status of a job
    Job {
        /// Job ID returned by `process`
        id: String,
    },
    /// Search a project's index
    Query {
        /// Project ID
        project: i64,
        /// Question or search text
        text: String,
        /// Number of matches to return
        #[arg(short, long)]
        k: Option<usize>,
        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project
    Create {
        /// Project name, unique per user
        name: String,
    },
    /// List your projects
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let user = cli.user;

    if let Commands::Config { show, init } = cli.command {
        let base_dir = match cli.base_dir {
            Some(dir) => dir,
            None => get_config_dir()?,
        };
        if init {
            init_config(&base_dir)?;
        }
        if show || !init {
            show_config(&Config::load(&base_dir)?);
        }
        return Ok(());
    }

    let app = App::open(cli.base_dir.as_deref()).await?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Project { action } => match action {
            ProjectAction::Create { name } => create_project(&app, user, &name).await?,
            ProjectAction::List => list_projects(&app, user).await?,
        },
        Commands::Upload { project, files } => upload(&app, user, project, &files).await?,
        Commands::Fetch { project, url } => fetch_page(&app, user, project, &url).await?,
        Commands::Documents { project } => list_documents(&app, user, project).await?,
        Commands::Process { project, wait } => process(&app, user, project, wait).await?,
        Commands::Worker { once } => run_worker(&app, once).await?,
        Commands::Job { id } => show_job(&app, &id).await?,
        Commands::Query {
            project,
            text,
            k,
            json,
        } => query(&app, user, project, &text, k, json).await?,
    }

    Ok(())
}
