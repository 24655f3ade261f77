mod support;

use support::TestEnv;

#[test]
fn admin_sees_workspace_stats() {
    let env = TestEnv::new();
    env.signup("bob@example.com", "user");
    env.signup("alice@example.com", "user");
    let done = env.new_task("Ship release", Some("bob@example.com"));
    env.new_task("Write notes", None);
    env.json(&["task", "status", &done, "done"]);
    env.signup("carol@example.com", "admin");

    let value = env.json(&["stats"]);
    let stats = &value["data"];
    assert_eq!(stats["scope"], "workspace");
    assert_eq!(stats["total_tasks"], 2);
    assert_eq!(stats["total_users"], 3);
    assert_eq!(stats["tasks_by_status"]["done"], 1);
    assert_eq!(stats["tasks_by_status"]["todo"], 1);
    assert_eq!(stats["users_by_role"]["admin"], 1);
    assert_eq!(stats["users_by_role"]["user"], 2);
    assert_eq!(stats["completion_rate"], 50);
    assert_eq!(stats["avg_tasks_per_user"], 0.7);
    assert_eq!(stats["recent_tasks"].as_array().expect("recent").len(), 2);
}

#[test]
fn user_sees_personal_stats() {
    let env = TestEnv::new();
    let bob = env.signup("bob@example.com", "user");
    env.signup("alice@example.com", "user");
    env.new_task("For bob", Some("bob@example.com"));
    env.new_task("For alice", None);

    env.signin("bob@example.com");
    env.new_task("Bob's own", None);

    let value = env.json(&["stats"]);
    let stats = &value["data"];
    assert_eq!(stats["scope"], "personal");
    assert_eq!(stats["uid"], bob.as_str());
    assert_eq!(stats["created_count"], 1);
    assert_eq!(stats["assigned_count"], 2);
    assert_eq!(stats["assigned_by_status"]["todo"], 2);
}

#[test]
fn stats_watch_stops_after_max_updates() {
    let env = TestEnv::new();
    env.signup("carol@example.com", "admin");
    env.new_task("Only task", None);

    let output = env
        .cmd()
        .args(["stats", "--watch", "--max-updates", "1", "--json"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let value: serde_json::Value =
        serde_json::from_str(text.lines().next().expect("update line")).expect("json");
    assert_eq!(value["command"], "stats");
    assert_eq!(value["data"]["total_tasks"], 1);
}

#[test]
fn users_lists_directory() {
    let env = TestEnv::new();
    env.signup("bob@example.com", "user");
    env.signup("alice@example.com", "admin");

    let value = env.json(&["users"]);
    assert_eq!(value["data"]["total"], 2);
    let emails: Vec<&str> = value["data"]["users"]
        .as_array()
        .expect("users")
        .iter()
        .map(|user| user["email"].as_str().expect("email"))
        .collect();
    assert_eq!(emails, vec!["alice@example.com", "bob@example.com"]);

    let value = env.json(&["users", "--search", "admin"]);
    assert_eq!(value["data"]["matched"], 1);
}
