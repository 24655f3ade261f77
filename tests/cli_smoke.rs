mod support;

use predicates::str::contains;

use support::taskdesk_cmd;

#[test]
fn taskdesk_help_works() {
    taskdesk_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("shared task tracking"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = [
        vec!["signup"],
        vec!["signin"],
        vec!["signout"],
        vec!["whoami"],
        vec!["stats"],
        vec!["users"],
        vec!["task"],
        vec!["task", "new"],
        vec!["task", "list"],
        vec!["task", "watch"],
    ];

    for cmd in subcommands {
        taskdesk_cmd().args(&cmd).arg("--help").assert().success();
    }
}

#[test]
fn missing_root_is_a_user_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    taskdesk_cmd()
        .env("TASKDESK_ROOT", dir.path().join("missing"))
        .arg("whoami")
        .assert()
        .code(2)
        .stderr(contains("workspace root does not exist"));
}

#[test]
fn commands_require_a_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = taskdesk_cmd()
        .env("TASKDESK_ROOT", dir.path())
        .args(["task", "list", "--json"])
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).expect("error json");
    assert_eq!(value["status"], "error");
    assert_eq!(value["command"], "task list");
}
