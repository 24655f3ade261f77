//! taskdesk users

use serde::Serialize;

use crate::cli::{output_options, Context, GlobalOptions};
use crate::error::Result;
use crate::model::User;
use crate::output::{emit_success, HumanOutput};

pub struct UsersOptions {
    pub search: Option<String>,
    pub global: GlobalOptions,
}

#[derive(Serialize)]
struct UsersOutput<'a> {
    total: usize,
    matched: usize,
    users: Vec<&'a User>,
}

/// Any signed-in identity may list users; assignment needs them.
pub fn run(options: UsersOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let identity = ctx.identity()?;
    let directory = ctx.directory()?;

    let users = directory.search(options.search.as_deref().unwrap_or(""));
    let mut human = HumanOutput::new(format!("Users ({})", users.len()));
    for user in &users {
        let marker = if user.uid == identity.uid { " (you)" } else { "" };
        human.push_detail(format!(
            "{} <{}> [{}] {}{}",
            user.label(),
            user.email,
            user.role,
            user.uid,
            marker
        ));
    }
    if users.is_empty() && !directory.is_empty() {
        human.push_next_step("taskdesk users");
    }

    let data = UsersOutput {
        total: directory.len(),
        matched: users.len(),
        users,
    };
    emit_success(output_options(&options.global), "users", &data, Some(&human))
}
