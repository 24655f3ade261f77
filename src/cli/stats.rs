//! taskdesk stats

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::access::QueryScope;
use crate::cli::{block_on, output_options, Context, GlobalOptions};
use crate::dashboard::{AdminDashboard, PersonalDashboard};
use crate::directory::UserDirectory;
use crate::error::{Error, Result};
use crate::model::{Identity, Task};
use crate::output::{emit_success, emit_update, HumanOutput, OutputOptions};
use crate::stats::{identity_stats, Aggregator, IdentityStats, Stats, StatusBreakdown};

pub struct StatsOptions {
    pub watch: bool,
    pub max_updates: Option<usize>,
    pub global: GlobalOptions,
}

#[derive(Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
enum StatsOutput {
    Workspace(Stats),
    Personal(IdentityStats),
}

pub fn run(options: StatsOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let output = output_options(&options.global);

    if options.watch {
        return run_watch(&ctx, &identity, output, options.max_updates);
    }

    let adapter = ctx.adapter();
    let directory = ctx.directory()?;
    let stats = if identity.is_admin() {
        let tasks = adapter.fetch(&QueryScope::AllTasks)?;
        let users = adapter.fetch_users()?;
        StatsOutput::Workspace(Aggregator::from_config(&ctx.config.stats).aggregate(
            &tasks.items,
            &users.items,
            Utc::now(),
        ))
    } else {
        let created = adapter.fetch(&QueryScope::CreatedBy(identity.uid.clone()))?;
        let assigned = adapter.fetch(&QueryScope::AssignedTo(identity.uid.clone()))?;
        let tasks = merge_by_id(created.items, assigned.items);
        StatsOutput::Personal(identity_stats(&tasks, &identity.uid, Utc::now()))
    };

    let human = render(&stats, &directory);
    emit_success(output, "stats", &stats, Some(&human))
}

fn run_watch(
    ctx: &Context,
    identity: &Identity,
    output: OutputOptions,
    max_updates: Option<usize>,
) -> Result<()> {
    let adapter = ctx.adapter();
    let directory = ctx.directory()?;
    let _watch = ctx
        .store
        .watch_files(Duration::from_millis(ctx.config.store.watch_debounce_ms))?;

    if identity.is_admin() {
        let mut dashboard =
            AdminDashboard::open(&adapter, Aggregator::from_config(&ctx.config.stats))?;
        block_on(async move {
            let mut sequence = 0;
            loop {
                let next = tokio::select! {
                    next = dashboard.next() => next,
                    _ = tokio::signal::ctrl_c() => None,
                };
                let Some(next) = next else { break };
                let stats = StatsOutput::Workspace(next?);
                sequence += 1;
                emit_update(output, "stats", sequence, &stats, Some(&render(&stats, &directory)))?;
                if max_updates.is_some_and(|max| sequence >= max) {
                    break;
                }
            }
            dashboard.close();
            Ok::<(), Error>(())
        })?
    } else {
        let mut dashboard = PersonalDashboard::open(&adapter, identity)?;
        block_on(async move {
            let mut sequence = 0;
            loop {
                let next = tokio::select! {
                    next = dashboard.next() => next,
                    _ = tokio::signal::ctrl_c() => None,
                };
                let Some(next) = next else { break };
                let stats = StatsOutput::Personal(next?);
                sequence += 1;
                emit_update(output, "stats", sequence, &stats, Some(&render(&stats, &directory)))?;
                if max_updates.is_some_and(|max| sequence >= max) {
                    break;
                }
            }
            dashboard.close();
            Ok::<(), Error>(())
        })?
    }
}

fn merge_by_id(created: Vec<Task>, assigned: Vec<Task>) -> Vec<Task> {
    let merged: BTreeMap<String, Task> = created
        .into_iter()
        .chain(assigned)
        .map(|task| (task.id.clone(), task))
        .collect();
    merged.into_values().collect()
}

fn format_breakdown(breakdown: &StatusBreakdown) -> String {
    format!(
        "todo={}, in-progress={}, done={}",
        breakdown.todo, breakdown.in_progress, breakdown.done
    )
}

fn render(stats: &StatsOutput, directory: &UserDirectory) -> HumanOutput {
    match stats {
        StatsOutput::Workspace(stats) => {
            let mut human = HumanOutput::new("Workspace stats");
            human.push_summary("Tasks", stats.total_tasks.to_string());
            human.push_summary("Users", stats.total_users.to_string());
            human.push_summary("By status", format_breakdown(&stats.tasks_by_status));
            human.push_summary(
                "By role",
                format!(
                    "admin={}, user={}",
                    stats.users_by_role.admin, stats.users_by_role.user
                ),
            );
            human.push_summary("Overdue", stats.overdue_tasks.to_string());
            human.push_summary("Completion", format!("{}%", stats.completion_rate));
            human.push_summary("Tasks per user", format!("{:.1}", stats.avg_tasks_per_user));
            for task in &stats.recent_tasks {
                human.push_detail(format!(
                    "[{}] {} {} (assignee: {})",
                    task.status,
                    task.id,
                    task.title,
                    directory.label_for(task.assignee())
                ));
            }
            let uncounted = stats.total_tasks - stats.tasks_by_status.total();
            if uncounted > 0 {
                human.push_warning(format!(
                    "{uncounted} task(s) have an unrecognized status"
                ));
            }
            human
        }
        StatsOutput::Personal(stats) => {
            let mut human = HumanOutput::new(format!(
                "Stats for {}",
                directory.label_for(&stats.uid)
            ));
            human.push_summary("Created", stats.created_count.to_string());
            human.push_summary("Assigned", stats.assigned_count.to_string());
            human.push_summary("Created by status", format_breakdown(&stats.created_by_status));
            human.push_summary(
                "Assigned by status",
                format_breakdown(&stats.assigned_by_status),
            );
            human.push_summary("Overdue", stats.overdue_tasks.to_string());
            human
        }
    }
}
