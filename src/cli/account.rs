//! taskdesk signup / signin / signout / whoami

use serde::Serialize;

use crate::account::{Session, SignUp};
use crate::cli::{output_options, Context, EventOutput, GlobalOptions};
use crate::error::Result;
use crate::events::EventKind;
use crate::model::{Role, User};
use crate::output::{emit_success, HumanOutput};

pub struct SignupOptions {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub global: GlobalOptions,
}

pub struct SigninOptions {
    pub email: String,
    pub password: String,
    pub global: GlobalOptions,
}

#[derive(Serialize)]
struct SessionOutput {
    uid: String,
    email: String,
    display_name: String,
    role: Role,
}

impl From<&User> for SessionOutput {
    fn from(user: &User) -> Self {
        Self {
            uid: user.uid.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Serialize)]
struct SignoutOutput {
    signed_out: bool,
}

#[derive(Serialize)]
struct AccountEventData<'a> {
    uid: &'a str,
    email: &'a str,
    role: Role,
}

pub fn run_signup(options: SignupOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let mut events = EventOutput::open(options.global.events.as_deref())?;

    let user = ctx.accounts().sign_up(SignUp {
        email: options.email,
        password: options.password,
        display_name: options.name,
        role: options.role,
    })?;
    Session::for_user(&user).save(&ctx.storage)?;

    let event_warning = events.emit(
        EventKind::UserSignedUp,
        Some(&user.uid),
        AccountEventData {
            uid: &user.uid,
            email: &user.email,
            role: user.role,
        },
    );

    let mut human = HumanOutput::new("Account created");
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    push_user_summary(&mut human, &user);
    human.push_next_step("taskdesk task new <title> --description <text>");

    emit_success(
        events.output_options(&options.global),
        "signup",
        &SessionOutput::from(&user),
        Some(&human),
    )
}

pub fn run_signin(options: SigninOptions) -> Result<()> {
    let ctx = Context::load(options.global.root.clone())?;
    let mut events = EventOutput::open(options.global.events.as_deref())?;

    let user = ctx.accounts().sign_in(&options.email, &options.password)?;
    Session::for_user(&user).save(&ctx.storage)?;

    let event_warning = events.emit(
        EventKind::UserSignedIn,
        Some(&user.uid),
        AccountEventData {
            uid: &user.uid,
            email: &user.email,
            role: user.role,
        },
    );

    let mut human = HumanOutput::new(format!("Signed in as {}", user.label()));
    if let Some(warning) = event_warning {
        human.push_warning(warning);
    }
    push_user_summary(&mut human, &user);

    emit_success(
        events.output_options(&options.global),
        "signin",
        &SessionOutput::from(&user),
        Some(&human),
    )
}

pub fn run_signout(global: GlobalOptions) -> Result<()> {
    let ctx = Context::load(global.root.clone())?;
    let mut events = EventOutput::open(global.events.as_deref())?;

    let previous = Session::load(&ctx.storage)?;
    let signed_out = Session::clear(&ctx.storage)?;

    let mut human = HumanOutput::new(if signed_out {
        "Signed out"
    } else {
        "No active session"
    });
    if let Some(session) = previous.as_ref() {
        let warning = events.emit(
            EventKind::UserSignedOut,
            Some(&session.uid),
            AccountEventData {
                uid: &session.uid,
                email: &session.email,
                role: session.role,
            },
        );
        if let Some(warning) = warning {
            human.push_warning(warning);
        }
    }

    emit_success(
        events.output_options(&global),
        "signout",
        &SignoutOutput { signed_out },
        Some(&human),
    )
}

pub fn run_whoami(global: GlobalOptions) -> Result<()> {
    let ctx = Context::load(global.root.clone())?;
    let identity = ctx.identity()?;
    let directory = ctx.directory()?;
    let user = directory.resolve(&identity.uid)?;

    let mut human = HumanOutput::new(user.label().to_string());
    push_user_summary(&mut human, user);

    emit_success(
        output_options(&global),
        "whoami",
        &SessionOutput::from(user),
        Some(&human),
    )
}

fn push_user_summary(human: &mut HumanOutput, user: &User) {
    human.push_summary("UID", user.uid.clone());
    human.push_summary("Email", user.email.clone());
    human.push_summary("Name", user.display_name.clone());
    human.push_summary("Role", user.role.to_string());
}
