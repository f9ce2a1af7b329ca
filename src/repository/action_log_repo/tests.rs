use super::ActionLogRepository;
use crate::domain::action_log::{ActionLog, ActionType};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

fn setup_test_db() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::init_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

fn make_test_log(action_type: ActionType, co_id: &str, actor: &str) -> ActionLog {
    ActionLog::new(action_type, actor)
        .for_change_order(co_id, "P1")
        .with_payload(&serde_json::json!({ "change_order_id": co_id }))
        .with_detail("Test log")
}

#[test]
fn test_insert_and_find_by_id() {
    let conn = setup_test_db();
    let repo = ActionLogRepository::new(conn);

    let log = make_test_log(ActionType::CreateChangeOrder, "co1", "user1");
    let action_id = repo.insert(&log).unwrap();
    assert_eq!(action_id, log.action_id);

    let found = repo.find_by_id(&action_id).unwrap().unwrap();
    assert_eq!(found.actor, "user1");
    assert_eq!(found.action_type, "CREATE_CHANGE_ORDER");
    assert_eq!(found.change_order_id.as_deref(), Some("co1"));
    assert_eq!(found.payload_json.unwrap()["change_order_id"], "co1");

    assert!(repo.find_by_id("missing").unwrap().is_none());
}

#[test]
fn test_find_by_change_order_in_order() {
    let conn = setup_test_db();
    let repo = ActionLogRepository::new(conn);

    repo.insert(&make_test_log(ActionType::CreateChangeOrder, "co1", "u1")).unwrap();
    repo.insert(&make_test_log(ActionType::Submit, "co1", "u1")).unwrap();
    repo.insert(&make_test_log(ActionType::Approve, "co1", "u2")).unwrap();
    repo.insert(&make_test_log(ActionType::CreateChangeOrder, "co2", "u1")).unwrap();

    let logs = repo.find_by_change_order("co1").unwrap();
    let types: Vec<_> = logs.iter().map(|l| l.action_type.as_str()).collect();
    assert_eq!(types, vec!["CREATE_CHANGE_ORDER", "SUBMIT", "APPROVE"]);

    assert_eq!(repo.count_by_change_order_and_type("co1", ActionType::Approve).unwrap(), 1);
    assert_eq!(repo.count_by_change_order_and_type("co2", ActionType::Approve).unwrap(), 0);
}

#[test]
fn test_insert_tx_rolls_back_with_transaction() {
    let conn = setup_test_db();
    {
        let mut guard = conn.lock().unwrap();
        let tx = guard.transaction().unwrap();
        ActionLogRepository::insert_tx(&tx, &make_test_log(ActionType::Apply, "co1", "u1")).unwrap();
        // 未提交即丢弃
    }

    let repo = ActionLogRepository::new(conn);
    assert!(repo.find_by_change_order("co1").unwrap().is_empty());
    assert!(repo
        .find_by_project_and_type("P1", ActionType::Apply, 10)
        .unwrap()
        .is_empty());
}
