//! Command-line interface for taskdesk
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::account::{Accounts, Session};
use crate::config::Config;
use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::events::{Event, EventDestination, EventKind, EventSink};
use crate::feed::TaskStoreAdapter;
use crate::gateway::TaskGateway;
use crate::model::Identity;
use crate::output::OutputOptions;
use crate::storage::Storage;
use crate::store::{DocumentStore, LocalStore};

mod account;
mod stats;
mod task;
mod users;

/// taskdesk - shared task tracking
///
/// Create and assign tasks, follow them live, and see workspace analytics.
/// Everything is stored under the workspace root.
#[derive(Parser, Debug)]
#[command(name = "taskdesk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workspace root (defaults to current directory)
    #[arg(long, global = true, env = "TASKDESK_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit JSONL events to a file, or `-` for stdout
    #[arg(long, global = true, env = "TASKDESK_EVENTS")]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an account and sign in
    Signup {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,

        /// Display name (defaults to the part of the email before `@`)
        #[arg(long)]
        name: Option<String>,

        /// Role: user or admin
        #[arg(long)]
        role: Option<String>,
    },

    /// Sign in with email and password
    Signin {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Forget the signed-in session
    Signout,

    /// Show the signed-in identity
    Whoami,

    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Analytics (workspace-wide for admins, personal otherwise)
    Stats {
        /// Keep running and print stats after every change
        #[arg(long)]
        watch: bool,

        /// Stop watching after this many updates
        #[arg(long, requires = "watch")]
        max_updates: Option<usize>,
    },

    /// List registered users
    Users {
        /// Filter by name, email, role or uid
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    New {
        title: String,

        #[arg(short, long)]
        description: String,

        /// Assignee uid or email (defaults to yourself)
        #[arg(long)]
        assign: Option<String>,

        /// Due date (YYYY-MM-DD or RFC3339)
        #[arg(long)]
        due: Option<String>,
    },

    /// List tasks visible to you
    List {
        /// View: mine, assigned, all
        #[arg(long, default_value = "mine")]
        view: String,

        /// Only tasks with this status
        #[arg(long)]
        status: Option<String>,

        /// Free-text filter over title, description, status and assignee
        #[arg(long)]
        search: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show a task
    Show { id: String },

    /// Edit task fields
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// New assignee uid or email
        #[arg(long)]
        assign: Option<String>,

        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,

        #[arg(long)]
        clear_due: bool,
    },

    /// Change task status (todo, in-progress, done)
    Status { id: String, status: String },

    /// Delete a task
    Delete { id: String },

    /// Follow a task view live
    Watch {
        #[arg(long, default_value = "mine")]
        view: String,

        /// Stop after this many snapshots
        #[arg(long)]
        max_snapshots: Option<usize>,
    },
}

impl Cli {
    /// Whether a failure should be reported as a JSON envelope. Events on
    /// stdout own the stream, so errors fall back to human form there.
    pub fn errors_as_json(&self) -> bool {
        self.json
            && !matches!(
                EventDestination::parse(self.events.as_deref()),
                Some(EventDestination::Stdout)
            )
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let global = GlobalOptions {
            root: self.root,
            json: self.json,
            quiet: self.quiet,
            events: self.events,
        };
        match self.command {
            Commands::Signup {
                email,
                password,
                name,
                role,
            } => account::run_signup(account::SignupOptions {
                email,
                password,
                name,
                role,
                global,
            }),
            Commands::Signin { email, password } => {
                account::run_signin(account::SigninOptions {
                    email,
                    password,
                    global,
                })
            }
            Commands::Signout => account::run_signout(global),
            Commands::Whoami => account::run_whoami(global),
            Commands::Task(cmd) => match cmd {
                TaskCommands::New {
                    title,
                    description,
                    assign,
                    due,
                } => task::run_new(task::NewOptions {
                    title,
                    description,
                    assign,
                    due,
                    global,
                }),
                TaskCommands::List {
                    view,
                    status,
                    search,
                    limit,
                } => task::run_list(task::ListOptions {
                    view,
                    status,
                    search,
                    limit,
                    global,
                }),
                TaskCommands::Show { id } => task::run_show(task::ShowOptions { id, global }),
                TaskCommands::Edit {
                    id,
                    title,
                    description,
                    assign,
                    due,
                    clear_due,
                } => task::run_edit(task::EditOptions {
                    id,
                    title,
                    description,
                    assign,
                    due,
                    clear_due,
                    global,
                }),
                TaskCommands::Status { id, status } => {
                    task::run_status(task::StatusOptions { id, status, global })
                }
                TaskCommands::Delete { id } => {
                    task::run_delete(task::DeleteOptions { id, global })
                }
                TaskCommands::Watch {
                    view,
                    max_snapshots,
                } => task::run_watch(task::WatchOptions {
                    view,
                    max_snapshots,
                    global,
                }),
            },
            Commands::Stats { watch, max_updates } => stats::run(stats::StatsOptions {
                watch,
                max_updates,
                global,
            }),
            Commands::Users { search } => users::run(users::UsersOptions { search, global }),
        }
    }
}

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub(crate) struct GlobalOptions {
    pub root: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

/// Opened workspace: configuration, storage and the persisted store.
pub(crate) struct Context {
    pub config: Config,
    pub storage: Storage,
    pub store: LocalStore,
}

impl Context {
    pub fn load(root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        if !root.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "workspace root does not exist: {}",
                root.display()
            )));
        }
        let config = Config::load_from_root(&root);
        let storage = Storage::for_root(root, &config);
        let store = LocalStore::open(storage.clone(), &config.store)?;
        Ok(Self {
            config,
            storage,
            store,
        })
    }

    pub fn shared_store(&self) -> Arc<dyn DocumentStore> {
        Arc::new(self.store.clone())
    }

    pub fn accounts(&self) -> Accounts {
        Accounts::new(self.shared_store(), self.config.accounts.clone())
    }

    pub fn adapter(&self) -> TaskStoreAdapter {
        TaskStoreAdapter::new(self.shared_store())
    }

    pub fn gateway(&self) -> TaskGateway {
        TaskGateway::new(self.shared_store())
    }

    pub fn directory(&self) -> Result<UserDirectory> {
        UserDirectory::load(&self.adapter())
    }

    pub fn session(&self) -> Result<Session> {
        Session::load(&self.storage)?.ok_or(Error::NotSignedIn)
    }

    /// Signed-in identity, with the role read back from the user directory.
    pub fn identity(&self) -> Result<Identity> {
        let session = self.session()?;
        self.accounts().identity_for(&session)
    }
}

/// Event sink for `--events`, plus the output mode it implies.
pub(crate) struct EventOutput {
    sink: Option<EventSink>,
    to_stdout: bool,
}

impl EventOutput {
    pub fn open(events: Option<&str>) -> Result<Self> {
        let destination = EventDestination::parse(events);
        let sink = destination.as_ref().map(|dest| dest.open()).transpose()?;
        let to_stdout = matches!(destination, Some(EventDestination::Stdout));
        Ok(Self { sink, to_stdout })
    }

    /// Events on stdout take over stdout; regular output is suppressed.
    pub fn output_options(&self, global: &GlobalOptions) -> OutputOptions {
        OutputOptions {
            json: global.json && !self.to_stdout,
            quiet: global.quiet || self.to_stdout,
        }
    }

    /// Emit an event. Failures become a warning rather than an error.
    pub fn emit<T: Serialize>(
        &mut self,
        kind: EventKind,
        actor: Option<&str>,
        data: T,
    ) -> Option<String> {
        let sink = self.sink.as_mut()?;
        let event = match Event::new(kind, actor.map(str::to_string)).with_data(data) {
            Ok(event) => event,
            Err(err) => return Some(format!("event output failed: {err}")),
        };
        if let Err(err) = sink.emit(&event) {
            return Some(format!("event output failed: {err}"));
        }
        None
    }
}

pub(crate) fn output_options(global: &GlobalOptions) -> OutputOptions {
    OutputOptions {
        json: global.json,
        quiet: global.quiet,
    }
}

/// Run a live command on a single-threaded runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}
