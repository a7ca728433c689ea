use serde_json::{json, Value};
use tempfile::TempDir;

use taskflow::config::Config;
use taskflow::control::{handle_line, Notification, Outcome};

fn config(dir: &TempDir) -> Config {
    Config {
        root: dir.path().join("projects"),
        ..Config::default()
    }
}

fn send(config: &Config, id: u64, method: &str, params: Value) -> Outcome {
    let line = json!({ "id": id, "method": method, "params": params }).to_string();
    handle_line(config, &line)
}

fn result(outcome: Outcome) -> Value {
    let response = serde_json::to_value(&outcome.response).expect("json");
    assert_eq!(response["success"], true, "{response}");
    response["result"].clone()
}

#[test]
fn responses_echo_the_request_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);

    let outcome = send(&config, 41, "project.list", Value::Null);
    let response = serde_json::to_value(&outcome.response).expect("json");
    assert_eq!(response["id"], 41);
    assert_eq!(response["result"], json!([]));
    assert!(response.get("error").is_none());
}

#[test]
fn every_task_operation_is_reachable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let task = json!({ "project": "home", "id": "001" });

    result(send(&config, 1, "project.create", json!({ "name": "home" })));
    result(send(
        &config,
        2,
        "task.create",
        json!({ "project": "home", "title": "Fix heat pump" }),
    ));
    result(send(&config, 3, "iteration.start", task.clone()));
    result(send(
        &config,
        4,
        "iteration.feedback",
        json!({ "project": "home", "id": "001", "text": "louder at night" }),
    ));
    result(send(
        &config,
        5,
        "iteration.next_steps",
        json!({ "project": "home", "id": "001", "text": "call installer" }),
    ));
    let quick = result(send(
        &config,
        6,
        "task.quick",
        json!({ "project": "home", "id": "001", "summary": "installer booked" }),
    ));
    assert_eq!(quick["summary"], "installer booked");
    assert_eq!(quick["user_feedback"], "louder at night");

    let done = result(send(&config, 7, "task.complete", task.clone()));
    assert_eq!(done["status"], "COMPLETED");

    let reopened = result(send(
        &config,
        8,
        "task.continue",
        json!({ "project": "home", "id": "001", "reason": "still loud" }),
    ));
    assert_eq!(reopened["iteration"], 2);

    let copy = result(send(
        &config,
        9,
        "task.clone",
        json!({ "project": "home", "id": "001", "title": "Check filter" }),
    ));
    assert_eq!(copy["id"], "002");

    let details = result(send(&config, 10, "task.get", task.clone()));
    assert_eq!(details["iterations"], json!([1, 2]));

    let first = result(send(
        &config,
        11,
        "iteration.get",
        json!({ "project": "home", "id": "001", "number": 1 }),
    ));
    assert_eq!(first["summary"], "installer booked");

    let listed = result(send(&config, 12, "iteration.list", task.clone()));
    assert_eq!(listed.as_array().map(Vec::len), Some(2));

    let deleted = result(send(
        &config,
        13,
        "task.delete",
        json!({ "project": "home", "id": "002" }),
    ));
    assert_eq!(deleted["title"], "Check filter");

    let tasks = result(send(
        &config,
        14,
        "task.list",
        json!({ "project": "home", "status": "IN_PROGRESS" }),
    ));
    assert_eq!(tasks.as_array().map(Vec::len), Some(1));

    let hits = result(send(&config, 15, "search", json!({ "query": "STILL LOUD" })));
    assert_eq!(hits[0]["field"], "iteration_notes");
    assert_eq!(hits[0]["iteration"], 2);

    let summary = result(send(&config, 16, "project.status", json!({ "project": "home" })));
    assert_eq!(summary["total_tasks"], 1);
    assert_eq!(summary["active_iterations"], 1);
}

#[test]
fn notifications_name_the_changed_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);

    let outcome = send(&config, 1, "project.create", json!({ "name": "home" }));
    assert_eq!(
        outcome.notification,
        Some(Notification::ProjectUpdated {
            project: "home".to_string()
        })
    );

    send(&config, 2, "task.create", json!({ "project": "home", "title": "One" }));
    let outcome = send(
        &config,
        3,
        "iteration.note",
        json!({ "project": "home", "id": "001", "text": "nothing open" }),
    );
    assert!(!outcome.response.success);
    assert!(outcome.notification.is_none());

    let outcome = send(&config, 4, "task.start", json!({ "project": "home", "id": "001" }));
    let notification = serde_json::to_value(outcome.notification.expect("notification")).expect("json");
    assert_eq!(
        notification,
        json!({ "event": "task_updated", "project": "home", "task_id": "001" })
    );

    let outcome = send(&config, 5, "template.list", Value::Null);
    assert!(outcome.response.success);
    assert!(outcome.notification.is_none());
}

#[test]
fn protocol_errors_use_string_codes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);

    let response = serde_json::to_value(handle_line(&config, "not json").response).expect("json");
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["code"], "PARSE_ERROR");

    let response =
        serde_json::to_value(send(&config, 1, "project.nuke", Value::Null).response).expect("json");
    assert_eq!(response["error"]["code"], "METHOD_NOT_FOUND");

    let response = serde_json::to_value(
        send(&config, 2, "task.get", json!({ "project": "home" })).response,
    )
    .expect("json");
    assert_eq!(response["error"]["code"], "INVALID_PARAMS");

    send(&config, 3, "project.create", json!({ "name": "home" }));
    let response = serde_json::to_value(
        send(&config, 4, "project.create", json!({ "name": "HOME" })).response,
    )
    .expect("json");
    assert_eq!(response["error"]["code"], "CONFLICT");
    assert_eq!(response["id"], 4);
}
