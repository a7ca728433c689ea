mod support;

use support::TestEnv;

#[test]
fn project_new_list_and_status() {
    let env = TestEnv::new();

    let project = env.json(&["project", "new", "home", "-d", "House work"]);
    assert_eq!(project["name"], "home");
    assert_eq!(project["status"], "active");
    assert!(env.root().join("home").join("project.json").exists());
    assert!(env.tasks_dir("home").is_dir());

    env.json(&["project", "new", "garden"]);
    let list = env.json(&["project", "list"]);
    let names: Vec<&str> = list
        .as_array()
        .expect("array")
        .iter()
        .map(|row| row["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["garden", "home"]);

    env.json(&["task", "new", "home", "Fix heat pump"]);
    env.json(&["task", "new", "home", "Paint fence"]);
    env.json(&["task", "start", "home", "001"]);

    let status = env.json(&["project", "status", "home"]);
    assert_eq!(status["total_tasks"], 2);
    assert_eq!(status["completed_tasks"], 0);
    assert_eq!(status["pending_tasks"], 2);
    assert_eq!(status["active_iterations"], 1);
    assert_eq!(status["by_status"]["IN_PROGRESS"], 1);
    assert_eq!(status["by_status"]["TODO"], 1);
}

#[test]
fn project_names_collide_ignoring_case() {
    let env = TestEnv::new();
    env.json(&["project", "new", "Home"]);

    let err = env.json_error(&["project", "new", "home"], 2);
    assert_eq!(err["error"]["kind"], "conflict");
    assert_eq!(err["command"], "project new");
}

#[test]
fn project_name_must_be_a_safe_segment() {
    let env = TestEnv::new();
    for name in ["../escape", ".hidden", "a/b", ""] {
        let err = env.json_error(&["project", "new", name], 2);
        assert_eq!(err["error"]["kind"], "validation", "{name}");
    }
}

#[test]
fn set_status_round_trips() {
    let env = TestEnv::new();
    env.json(&["project", "new", "home"]);

    let project = env.json(&["project", "set-status", "home", "archived"]);
    assert_eq!(project["status"], "archived");

    let status = env.json(&["project", "status", "home"]);
    assert_eq!(status["status"], "archived");

    let err = env.json_error(&["project", "set-status", "home", "frozen"], 2);
    assert_eq!(err["error"]["kind"], "validation");
}

#[test]
fn unknown_project_is_not_found() {
    let env = TestEnv::new();
    let err = env.json_error(&["project", "status", "ghost"], 2);
    assert_eq!(err["error"]["kind"], "not_found");
    assert!(err["next_steps"].is_array());
}
