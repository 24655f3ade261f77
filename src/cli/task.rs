//! taskdesk task command implementations.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::access::{self, QueryScope, ViewMode};
use crate::cli::{block_on, output_options, Context, EventOutput, GlobalOptions};
use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::feed::FeedEvent;
use crate::filter::TaskFilter;
use crate::gateway;
use crate::model::{parse_date, Identity, NewTask, Task, TaskPatch, TaskStatus};
use crate::output::{emit_success, emit_update, HumanOutput};

pub struct NewOptions {
    pub title: String,
    pub description: String,
    pub assign: Option<String>,
    pub due: Option<String>,
    pub global: GlobalOptions,
}

pub struct ListOptions {
    pub view: String,
    pub status: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub global: GlobalOptions,
}

pub struct ShowOptions {
    pub id: String,
    pub global: GlobalOptions,
}

pub struct EditOptions {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub assign: Option<String>,
    pub due: Option<String>,
    pub clear_due: bool,
    pub global: GlobalOptions,
}

pub struct StatusOptions {
    pub id: String,
    pub status: String,
    pub global: GlobalOptions,
}

pub struct DeleteOptions {
    pub id: String,
    pub global: GlobalOptions,
}

pub struct WatchOptions {
    pub view: String,
    pub max_snapshots: Option<usize>,
    pub global: GlobalOptions,
}

#[derive(Serialize)]
struct TaskListOutput {
    view: ViewMode,
    scope: QueryScope,
    total: usize,
    #[serde(skip_serializing_if = "is_zero")]
    rejected: usize,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct TaskShowOutput {
    #[serde(flatten)]
    task: Task,
    overdue: bool,
}

#[derive(Serialize)]
struct TaskDeleteOutput {
    id: String,
}

#[derive(Serialize)]
struct TaskEventData<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_by: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_to: Option<&'a str>,
}

impl<'a> TaskEventData<'a> {
    fn from_task(task: &'a Task) -> Self {
        Self {
            id: &task.id,
            title: Some(&task.title),
            status: Some(task.status.as_str()),
            created_by: Some(&task.created_by),
            assigned_to: task.assigned_to.as_deref(),
        }
    }
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

pub fn run_new(options: NewOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let mut events = EventOutput::open(options.global.events.as_deref())?;
    let mut input = NewTask {
        title: options.title,
        description: options.description,
        assigned_to: None,
        due_date: options.due.as_deref().map(parse_date).transpose()?,
    };
    gateway::validate_new(&input)?;

    let directory = ctx.directory()?;
    input.assigned_to = options
        .assign
        .as_deref()
        .map(|key| resolve_assignee(&directory, key))
        .transpose()?;

    let task = ctx.gateway().create(&identity, input)?;

    let event_warning = events.emit(
        EventKind::TaskCreated,
        Some(&identity.uid),
        TaskEventData::from_task(&task),
    );

    let mut human = HumanOutput::new("Task created");
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    push_task_summary(&mut human, &task, &directory);
    human.push_next_step(format!("taskdesk task show {}", task.id));

    emit_success(
        events.output_options(&options.global),
        "task new",
        &task,
        Some(&human),
    )
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let view = ViewMode::parse(&options.view)?;
    let status = options.status.as_deref().map(TaskStatus::parse).transpose()?;
    let scope = access::scope_for(Some(&identity), view);

    let snapshot = ctx.adapter().fetch(&scope)?;
    let directory = ctx.directory()?;
    let filter = TaskFilter {
        search: options.search,
        status,
        limit: options.limit,
    };
    let tasks = filter.apply(snapshot.items, Some(&directory));

    let mut human = HumanOutput::new(format!("Tasks ({})", view_label(&identity, view)));
    human.push_summary("Total", tasks.len().to_string());
    if snapshot.rejected > 0 {
        human.push_warning(format!(
            "{} malformed task document(s) skipped",
            snapshot.rejected
        ));
    }
    let now = Utc::now();
    for task in &tasks {
        human.push_detail(task_line(task, &directory, now));
    }
    if tasks.is_empty() {
        human.push_next_step("taskdesk task new <title> --description <text>");
    }

    let output = TaskListOutput {
        view,
        scope,
        total: tasks.len(),
        rejected: snapshot.rejected,
        tasks,
    };

    emit_success(
        output_options(&options.global),
        "task list",
        &output,
        Some(&human),
    )
}

pub fn run_show(options: ShowOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let task = ctx.adapter().get_task(options.id.trim())?;
    if !access::can_view(&identity, &task) {
        return Err(Error::PermissionDenied(format!(
            "task {} is not visible to you",
            task.id
        )));
    }
    let directory = ctx.directory()?;

    let mut human = HumanOutput::new(format!("Task {}", task.id));
    push_task_summary(&mut human, &task, &directory);
    human.push_detail(task.description.clone());
    let overdue = task.is_overdue(Utc::now());
    if overdue {
        human.push_warning("overdue");
    }

    emit_success(
        output_options(&options.global),
        "task show",
        &TaskShowOutput { task, overdue },
        Some(&human),
    )
}

pub fn run_edit(options: EditOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let mut events = EventOutput::open(options.global.events.as_deref())?;

    let due_date = if options.clear_due {
        Some(None)
    } else {
        options.due.as_deref().map(parse_date).transpose()?.map(Some)
    };
    let mut patch = TaskPatch {
        title: options.title,
        description: options.description,
        status: None,
        assigned_to: options.assign,
        due_date,
    };
    gateway::validate_patch(&patch)?;

    let directory = ctx.directory()?;
    patch.assigned_to = patch
        .assigned_to
        .as_deref()
        .map(|key| resolve_assignee(&directory, key))
        .transpose()?;

    let task = ctx.gateway().update(&identity, &options.id, patch)?;

    let event_warning = events.emit(
        EventKind::TaskUpdated,
        Some(&identity.uid),
        TaskEventData::from_task(&task),
    );

    let mut human = HumanOutput::new("Task updated");
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    push_task_summary(&mut human, &task, &directory);

    emit_success(
        events.output_options(&options.global),
        "task edit",
        &task,
        Some(&human),
    )
}

pub fn run_status(options: StatusOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let mut events = EventOutput::open(options.global.events.as_deref())?;
    let status = TaskStatus::parse(&options.status)?;

    let task = ctx
        .gateway()
        .update(&identity, &options.id, TaskPatch::status(status))?;

    let event_warning = events.emit(
        EventKind::TaskStatusChanged,
        Some(&identity.uid),
        TaskEventData {
            id: &task.id,
            title: None,
            status: Some(task.status.as_str()),
            created_by: None,
            assigned_to: None,
        },
    );

    let mut human = HumanOutput::new("Task status updated");
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    human.push_summary("ID", task.id.clone());
    human.push_summary("Status", task.status.to_string());

    emit_success(
        events.output_options(&options.global),
        "task status",
        &task,
        Some(&human),
    )
}

pub fn run_delete(options: DeleteOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let mut events = EventOutput::open(options.global.events.as_deref())?;
    let id = options.id.trim().to_string();

    ctx.gateway().delete(&identity, &id)?;

    let event_warning = events.emit(
        EventKind::TaskDeleted,
        Some(&identity.uid),
        TaskEventData {
            id: &id,
            title: None,
            status: None,
            created_by: None,
            assigned_to: None,
        },
    );

    let mut human = HumanOutput::new("Task deleted");
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    human.push_summary("ID", id.clone());

    emit_success(
        events.output_options(&options.global),
        "task delete",
        &TaskDeleteOutput { id },
        Some(&human),
    )
}

pub fn run_watch(options: WatchOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let view = ViewMode::parse(&options.view)?;
    let scope = access::scope_for(Some(&identity), view);
    let adapter = ctx.adapter();
    let mut users = ctx.directory()?;

    let mut feed = adapter.subscribe(&scope)?;
    let mut user_feed = adapter.subscribe_users()?;
    let _watch = ctx
        .store
        .watch_files(Duration::from_millis(ctx.config.store.watch_debounce_ms))?;
    let output = output_options(&options.global);
    let header = format!("Tasks ({})", view_label(&identity, view));
    let max_snapshots = options.max_snapshots;

    block_on(async move {
        let mut sequence = 0;
        loop {
            tokio::select! {
                event = feed.recv() => match event {
                    Some(FeedEvent::Snapshot(snapshot)) => {
                        sequence += 1;
                        let tasks = TaskFilter::default().apply(snapshot.items, Some(&users));
                        let mut human = HumanOutput::new(header.clone());
                        human.push_summary("Total", tasks.len().to_string());
                        let now = Utc::now();
                        for task in &tasks {
                            human.push_detail(task_line(task, &users, now));
                        }
                        let data = TaskListOutput {
                            view,
                            scope: scope.clone(),
                            total: tasks.len(),
                            rejected: snapshot.rejected,
                            tasks,
                        };
                        emit_update(output, "task watch", sequence, &data, Some(&human))?;
                        if max_snapshots.is_some_and(|max| sequence >= max) {
                            break;
                        }
                    }
                    Some(FeedEvent::Error(err)) => return Err(Error::Subscription(err)),
                    None => break,
                },
                event = user_feed.recv() => match event {
                    Some(FeedEvent::Snapshot(snapshot)) => users.apply(&snapshot),
                    Some(FeedEvent::Error(err)) => return Err(Error::Subscription(err)),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        feed.unsubscribe();
        user_feed.unsubscribe();
        Ok::<(), Error>(())
    })?
}

fn resolve_assignee(directory: &UserDirectory, key: &str) -> Result<String> {
    Ok(directory.resolve(key)?.uid.clone())
}

fn view_label(identity: &Identity, view: ViewMode) -> &'static str {
    match access::scope_for(Some(identity), view) {
        QueryScope::AllTasks => "all",
        QueryScope::AssignedTo(_) => "assigned to me",
        _ => "created by me",
    }
}

fn task_line(task: &Task, directory: &UserDirectory, now: chrono::DateTime<Utc>) -> String {
    let mut line = format!(
        "[{}] {} {} (assignee: {})",
        task.status,
        task.id,
        task.title,
        directory.label_for(task.assignee())
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!(" (due: {})", due.format("%Y-%m-%d")));
    }
    if task.is_overdue(now) {
        line.push_str(" OVERDUE");
    }
    line
}

fn push_task_summary(human: &mut HumanOutput, task: &Task, directory: &UserDirectory) {
    human.push_summary("ID", task.id.clone());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Created by", directory.label_for(&task.created_by).to_string());
    human.push_summary("Assigned to", directory.label_for(task.assignee()).to_string());
    if let Some(due) = task.due_date {
        human.push_summary("Due", due.format("%Y-%m-%d").to_string());
    }
    if let Some(created_at) = task.created_at {
        human.push_summary("Created", created_at.to_rfc3339());
    }
    if let Some(updated_at) = task.updated_at {
        human.push_summary("Updated", updated_at.to_rfc3339());
    }
}
