use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use escruta_client::api::{ChatRequest, NewNote, NewNotebook, NewSource, NotebookUpdate, NotebooksApi};
use escruta_client::auth::AuthService;
use escruta_client::config::Config;
use escruta_client::fetch::{Fetcher, RequestOptions, Upload};
use escruta_client::logging;
use escruta_client::session::{FileSession, SessionStore};

#[derive(Parser, Debug)]
#[command(name = "escruta")]
#[command(about = "Command-line client for the Escruta notebook API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/escruta/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// API base URL (overrides config and ESCRUTA_BACKEND_URL)
  #[arg(long, global = true)]
  url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Log in and store the session token
  Login {
    email: String,
    #[arg(long, env = "ESCRUTA_PASSWORD", hide_env_values = true)]
    password: String,
  },
  /// Create an account and log in
  Register {
    email: String,
    /// Full name shown in the app
    #[arg(long)]
    name: String,
    #[arg(long, env = "ESCRUTA_PASSWORD", hide_env_values = true)]
    password: String,
  },
  /// Forget the session token
  Logout,
  /// Show the logged-in user
  Whoami {
    #[arg(long)]
    force: bool,
  },
  /// Notebook management
  Notebooks(NotebooksArgs),
  /// Notes inside a notebook
  Notes(NotesArgs),
  /// Sources inside a notebook
  Sources(SourcesArgs),
  /// Ask a question about a notebook's sources
  Chat {
    notebook: String,
    message: String,
    /// Continue an earlier conversation
    #[arg(long)]
    conversation: Option<String>,
  },
  /// Raw GET of any endpoint, through the cache
  Get {
    endpoint: String,
    /// Query parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
    /// Skip the cache lookup
    #[arg(long)]
    force: bool,
  },
}

#[derive(ClapArgs, Debug)]
struct NotebooksArgs {
  #[command(subcommand)]
  action: NotebooksCmd,
}

#[derive(Subcommand, Debug)]
enum NotebooksCmd {
  List {
    #[arg(long)]
    force: bool,
  },
  /// Notebook with its notes, sources and summary
  Show {
    id: String,
    #[arg(long)]
    force: bool,
  },
  Create {
    title: String,
    #[arg(long)]
    icon: Option<String>,
  },
  Rename {
    id: String,
    title: String,
  },
  Delete {
    id: String,
  },
}

#[derive(ClapArgs, Debug)]
struct NotesArgs {
  #[command(subcommand)]
  action: NotesCmd,
}

#[derive(Subcommand, Debug)]
enum NotesCmd {
  List {
    notebook: String,
    #[arg(long)]
    force: bool,
  },
  Create {
    notebook: String,
    title: String,
    #[arg(long)]
    content: Option<String>,
    #[arg(long)]
    icon: Option<String>,
  },
  Delete {
    notebook: String,
    note: String,
  },
}

#[derive(ClapArgs, Debug)]
struct SourcesArgs {
  #[command(subcommand)]
  action: SourcesCmd,
}

#[derive(Subcommand, Debug)]
enum SourcesCmd {
  List {
    notebook: String,
    #[arg(long)]
    force: bool,
  },
  /// Add a web page by link
  Add {
    notebook: String,
    title: String,
    link: String,
    #[arg(long)]
    icon: Option<String>,
    /// Let the server convert the content with its model
    #[arg(long)]
    ai: bool,
  },
  /// Upload a local file
  Upload {
    notebook: String,
    path: PathBuf,
    /// Defaults to the file name
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    icon: Option<String>,
    #[arg(long)]
    ai: bool,
  },
  Show {
    notebook: String,
    source: String,
    #[arg(long)]
    force: bool,
  },
  /// Print the source summary
  Summary {
    notebook: String,
    source: String,
    /// Generate a new summary first
    #[arg(long, conflicts_with = "delete")]
    generate: bool,
    /// Delete the stored summary
    #[arg(long)]
    delete: bool,
  },
  Delete {
    notebook: String,
    source: String,
  },
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
  match raw.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected key=value, got {:?}", raw)),
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override API url if specified on command line
  if let Some(url) = args.url {
    config.api.url = url.trim().trim_end_matches('/').to_string();
  }

  let _guard = logging::init(&config.log)?;

  let session: Arc<dyn SessionStore> = match &config.session.path {
    Some(path) => Arc::new(FileSession::open(path)?),
    None => Arc::new(FileSession::open_default()?),
  };
  let fetcher = Fetcher::from_config(&config, session)?;

  run(args.command, fetcher).await
}

async fn run(command: Command, fetcher: Fetcher) -> Result<()> {
  let auth = AuthService::new(fetcher.clone());
  let api = NotebooksApi::new(fetcher.clone());

  match command {
    Command::Login { email, password } => {
      auth.login(&email, &password).await?;
      println!("Logged in as {}", email);
    }
    Command::Register {
      email,
      name,
      password,
    } => {
      auth.register(&email, &password, &name).await?;
      println!("Registered and logged in as {}", email);
    }
    Command::Logout => {
      auth.logout()?;
      println!("Logged out");
    }
    Command::Whoami { force } => {
      if !auth.is_authenticated() {
        return Err(eyre!("Not logged in. Run `escruta login <email>` first."));
      }
      print_json(&auth.current_user(force).await?)?;
    }
    Command::Notebooks(args) => notebooks(&api, args.action).await?,
    Command::Notes(args) => notes(&api, args.action).await?,
    Command::Sources(args) => sources(&api, args.action).await?,
    Command::Chat {
      notebook,
      message,
      conversation,
    } => {
      let reply = api
        .chat(
          &notebook,
          &ChatRequest {
            user_input: message,
            conversation_id: conversation,
          },
        )
        .await?;
      println!("{}", reply.content);
      for cited in &reply.cited_sources {
        println!("  [{}] {}", cited.id, cited.title.as_deref().unwrap_or(""));
      }
      if let Some(id) = reply.conversation_id {
        eprintln!("conversation: {}", id);
      }
    }
    Command::Get {
      endpoint,
      params,
      force,
    } => {
      let options = params
        .into_iter()
        .fold(RequestOptions::get(), |options, (key, value)| options.param(key, value));
      let result = fetcher.request(&endpoint, &options, force).await?;
      print_json(&*result.data)?;
    }
  }

  Ok(())
}

async fn notebooks(api: &NotebooksApi, action: NotebooksCmd) -> Result<()> {
  match action {
    NotebooksCmd::List { force } => {
      for notebook in api.notebooks(force).await? {
        println!("{}  {}", notebook.id, notebook.title);
      }
    }
    NotebooksCmd::Show { id, force } => {
      let (content, summary) = futures::try_join!(api.notebook(&id, force), api.summary(&id, force))?;
      print_json(&content)?;
      if !summary.is_empty() {
        println!("\n{}", summary);
      }
    }
    NotebooksCmd::Create { title, icon } => {
      print_json(&api.create_notebook(&NewNotebook { icon, title }).await?)?;
    }
    NotebooksCmd::Rename { id, title } => {
      let update = NotebookUpdate {
        id,
        icon: None,
        title: Some(title),
      };
      print_json(&api.update_notebook(&update).await?)?;
    }
    NotebooksCmd::Delete { id } => {
      let deleted = api.delete_notebook(&id).await?;
      println!("Deleted notebook {}", deleted.title);
    }
  }
  Ok(())
}

async fn notes(api: &NotebooksApi, action: NotesCmd) -> Result<()> {
  match action {
    NotesCmd::List { notebook, force } => {
      for note in api.notes(&notebook, force).await? {
        println!("{}  {}", note.id, note.title);
      }
    }
    NotesCmd::Create {
      notebook,
      title,
      content,
      icon,
    } => {
      let note = NewNote {
        icon,
        title,
        content,
      };
      print_json(&api.create_note(&notebook, &note).await?)?;
    }
    NotesCmd::Delete { notebook, note } => {
      let deleted = api.delete_note(&notebook, &note).await?;
      println!("Deleted note {}", deleted.title);
    }
  }
  Ok(())
}

async fn sources(api: &NotebooksApi, action: SourcesCmd) -> Result<()> {
  match action {
    SourcesCmd::List { notebook, force } => {
      for source in api.sources(&notebook, force).await? {
        println!(
          "{}  {}  {}",
          source.id,
          source.title,
          source.link.as_deref().unwrap_or("")
        );
      }
    }
    SourcesCmd::Add {
      notebook,
      title,
      link,
      icon,
      ai,
    } => {
      let source = NewSource { icon, title, link };
      print_json(&api.add_source(&notebook, &source, ai).await?)?;
    }
    SourcesCmd::Upload {
      notebook,
      path,
      title,
      icon,
      ai,
    } => {
      let content = tokio::fs::read(&path)
        .await
        .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
      let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| eyre!("Not a file: {}", path.display()))?;
      let title = title.unwrap_or_else(|| file_name.clone());

      let mut upload = Upload::new(file_name, content);
      if let Some(mime) = mime_guess::from_path(&path).first() {
        upload = upload.with_mime(mime.essence_str());
      }

      let source = api
        .upload_source(&notebook, &title, icon.as_deref(), upload, ai)
        .await?;
      print_json(&source)?;
    }
    SourcesCmd::Show {
      notebook,
      source,
      force,
    } => {
      print_json(&api.source(&notebook, &source, force).await?)?;
    }
    SourcesCmd::Summary {
      notebook,
      source,
      generate,
      delete,
    } => {
      if delete {
        api.delete_source_summary(&notebook, &source).await?;
        println!("Deleted summary");
      } else {
        let summary = if generate {
          api.generate_source_summary(&notebook, &source).await?
        } else {
          api.source_summary(&notebook, &source, false).await?
        };
        println!("{}", summary);
      }
    }
    SourcesCmd::Delete { notebook, source } => {
      let deleted = api.delete_source(&notebook, &source).await?;
      println!("Deleted source {}", deleted.title);
    }
  }
  Ok(())
}
