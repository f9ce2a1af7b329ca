// ==========================================
// 止停动作级联集成测试
// ==========================================
// 职责: 验证批准时的任务阻断/采购单挂起/交付阻断, 以及撤销的幂等性
// ==========================================


#[cfg(test)]
mod stop_action_cascade_test {
    use cabinet_change_order::app::AppState;
    use cabinet_change_order::config::config_keys;
    use cabinet_change_order::domain::types::{PurchaseOrderState, StopActionType, TaskState};
    use cabinet_change_order::domain::{ActionType, ChangeOrder, NewChangeOrder};
    use cabinet_change_order::engine::ChangeOrderError;

    use crate::test_helpers::{
        create_test_state, exec, query_i64, seed_project, seed_purchase_order, seed_task,
    };

    /// 项目 P1 + 3 个可中断任务 + 1 个已完成任务 + 1 张外键采购单
    fn seed_shop(state: &AppState) {
        let conn = state.conn.lock().unwrap();
        seed_project(&conn, "P1", "Smith Kitchen", Some("TCS-0042"));
        seed_task(&conn, "T1", "P1", "pending");
        seed_task(&conn, "T2", "P1", "in_progress");
        seed_task(&conn, "T3", "P1", "approved");
        seed_task(&conn, "T4", "P1", "done");
        seed_purchase_order(&conn, "PO1", Some("P1"), None, "purchase");
        seed_purchase_order(&conn, "PO9", Some("P1"), None, "done");
    }

    fn approved_order(state: &AppState) -> ChangeOrder {
        let service = &state.change_order_service;
        let co = service
            .create(
                "P1",
                NewChangeOrder {
                    title: "Swap hardware".to_string(),
                    ..Default::default()
                },
                "pm",
            )
            .unwrap();
        service.submit_for_approval(&co.change_order_id, "pm").unwrap();
        service.approve(&co.change_order_id, "owner", None).unwrap().change_order
    }

    #[test]
    fn test_approval_records_one_stop_action_per_entity() {
        let (_tmp, state) = create_test_state();
        seed_shop(&state);
        let co = approved_order(&state);

        let summary = state
            .stop_action_service
            .get_stop_actions_summary(&co.change_order_id)
            .unwrap();
        assert_eq!(summary.tasks_blocked, 3);
        assert_eq!(summary.pos_held, 1);
        assert!(summary.delivery_blocked);
        // 3 个任务 + 1 张采购单 + 1 条交付阻断记录
        assert_eq!(summary.total_active, 5);

        let actions = state.stop_action_service.list_stop_actions(&co.change_order_id).unwrap();
        let tasks: Vec<_> = actions
            .iter()
            .filter(|a| a.action_type == StopActionType::TaskBlocked)
            .collect();
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|a| a.new_state == "blocked" && a.entity_type == "Task"));
        assert!(actions.iter().all(|a| a.performed_by == "owner" && a.is_active()));

        let po = state.project_repo.find_purchase_order("PO1").unwrap().unwrap();
        assert_eq!(po.state, PurchaseOrderState::OnHold);
        assert_eq!(po.held_by.as_deref(), Some("owner"));
        assert!(po.held_at.is_some());
        assert_eq!(po.state_before_hold.as_deref(), Some("purchase"));

        // 已完成的任务与采购单不受影响
        assert_eq!(state.project_repo.find_task("T4").unwrap().unwrap().state, TaskState::Done);
        assert_eq!(
            state.project_repo.find_purchase_order("PO9").unwrap().unwrap().state,
            PurchaseOrderState::Done
        );
    }

    #[test]
    fn test_revert_restores_previous_states_and_is_idempotent() {
        let (_tmp, state) = create_test_state();
        seed_shop(&state);
        let co = approved_order(&state);

        let first = state
            .stop_action_service
            .revert_stop_actions(&co.change_order_id, "owner")
            .unwrap();
        assert_eq!(first.tasks_unblocked, 3);
        assert_eq!(first.pos_released, 1);
        assert!(first.delivery_unblocked);

        assert_eq!(state.project_repo.find_task("T1").unwrap().unwrap().state, TaskState::Pending);
        assert_eq!(state.project_repo.find_task("T2").unwrap().unwrap().state, TaskState::InProgress);
        assert_eq!(state.project_repo.find_task("T3").unwrap().unwrap().state, TaskState::Approved);
        let po = state.project_repo.find_purchase_order("PO1").unwrap().unwrap();
        assert_eq!(po.state, PurchaseOrderState::Purchase);
        assert!(po.held_by_change_order_id.is_none());

        let second = state
            .stop_action_service
            .revert_stop_actions(&co.change_order_id, "owner")
            .unwrap();
        assert!(second.is_noop());

        assert_eq!(
            state
                .action_log_repo
                .count_by_change_order_and_type(&co.change_order_id, ActionType::RevertStopActions)
                .unwrap(),
            1
        );
        let active = state
            .stop_action_service
            .get_stop_actions_summary(&co.change_order_id)
            .unwrap();
        assert!(!active.has_active());
        let actions = state.stop_action_service.list_stop_actions(&co.change_order_id).unwrap();
        assert!(actions.iter().all(|a| a.reverted_by.as_deref() == Some("owner")));
    }

    #[test]
    fn test_revert_skips_deleted_entities() {
        let (_tmp, state) = create_test_state();
        seed_shop(&state);
        let co = approved_order(&state);

        exec(&state, "DELETE FROM task WHERE task_id = 'T2'; DELETE FROM purchase_order WHERE purchase_order_id = 'PO1';");

        let outcome = state.change_order_service.cancel(&co.change_order_id, "owner").unwrap();
        let reverted = outcome.reverted.unwrap();
        assert_eq!(reverted.tasks_unblocked, 2);
        assert_eq!(reverted.pos_released, 0);
        assert_eq!(reverted.missing_entities, 2);
        assert!(reverted.delivery_unblocked);

        assert_eq!(
            query_i64(&state, "SELECT COUNT(*) FROM change_order_stop_action WHERE reverted_at IS NULL"),
            0
        );
    }

    #[test]
    fn test_legacy_origin_purchase_orders() {
        let (_tmp, state) = create_test_state();
        seed_shop(&state);
        {
            let conn = state.conn.lock().unwrap();
            seed_purchase_order(&conn, "PO2", None, Some("TCS-0042 hinges"), "draft");
            seed_purchase_order(&conn, "PO3", None, Some("Smith Kitchen drawer slides"), "sent");
            seed_purchase_order(&conn, "PO4", None, Some("TCS-0099 hinges"), "draft");
        }
        let co = approved_order(&state);

        let summary = state
            .stop_action_service
            .get_stop_actions_summary(&co.change_order_id)
            .unwrap();
        assert_eq!(summary.pos_held, 3);
        assert_eq!(
            state.project_repo.find_purchase_order("PO4").unwrap().unwrap().state,
            PurchaseOrderState::Draft
        );

        state.change_order_service.cancel(&co.change_order_id, "owner").unwrap();
        assert_eq!(
            state.project_repo.find_purchase_order("PO3").unwrap().unwrap().state,
            PurchaseOrderState::Sent
        );
    }

    #[test]
    fn test_legacy_origin_matching_can_be_disabled() {
        let (_tmp, state) = create_test_state();
        seed_shop(&state);
        {
            let conn = state.conn.lock().unwrap();
            seed_purchase_order(&conn, "PO2", None, Some("TCS-0042 hinges"), "draft");
        }
        state
            .config
            .set_global_config_value(config_keys::PO_LEGACY_ORIGIN_MATCH, "false")
            .unwrap();

        let co = approved_order(&state);
        let summary = state
            .stop_action_service
            .get_stop_actions_summary(&co.change_order_id)
            .unwrap();
        assert_eq!(summary.pos_held, 1);
        assert_eq!(
            state.project_repo.find_purchase_order("PO2").unwrap().unwrap().state,
            PurchaseOrderState::Draft
        );
    }

    #[test]
    fn test_manual_execute_requires_approved_status() {
        let (_tmp, state) = create_test_state();
        seed_shop(&state);
        let co = state
            .change_order_service
            .create(
                "P1",
                NewChangeOrder {
                    title: "Swap hardware".to_string(),
                    ..Default::default()
                },
                "pm",
            )
            .unwrap();

        let err = state
            .stop_action_service
            .execute_stop_actions(&co.change_order_id, "owner")
            .unwrap_err();
        assert!(matches!(err, ChangeOrderError::InvalidTransition { .. }));
        assert_eq!(query_i64(&state, "SELECT COUNT(*) FROM change_order_stop_action"), 0);

        assert!(matches!(
            state.stop_action_service.get_stop_actions_summary("missing"),
            Err(ChangeOrderError::NotFound { .. })
        ));
    }

    #[test]
    fn test_project_without_work_still_blocks_delivery() {
        let (_tmp, state) = create_test_state();
        {
            let conn = state.conn.lock().unwrap();
            seed_project(&conn, "P1", "Empty Bath", None);
        }
        let co = approved_order(&state);

        let summary = state
            .stop_action_service
            .get_stop_actions_summary(&co.change_order_id)
            .unwrap();
        assert_eq!(summary.tasks_blocked, 0);
        assert_eq!(summary.pos_held, 0);
        assert!(summary.delivery_blocked);
        assert_eq!(summary.total_active, 1);
        assert!(co.change_order_number.starts_with("CO-P1-"));
    }
}
