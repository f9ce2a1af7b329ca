// ==========================================
// 并发控制测试
// ==========================================
// 职责: 验证变更单状态迁移的乐观锁 (status + revision CAS)
// ==========================================


#[cfg(test)]
mod concurrent_control_test {
    use cabinet_change_order::domain::types::ChangeOrderStatus;
    use cabinet_change_order::domain::NewChangeOrder;
    use cabinet_change_order::engine::ChangeOrderError;
    use cabinet_change_order::repository::{ChangeOrderRepository, RepositoryError};
    use std::sync::Arc;
    use std::thread;

    use crate::test_helpers::{create_test_state, query_i64, seed_kitchen, seed_task};

    #[test]
    fn test_stale_revision_is_rejected() {
        let (_tmp, state) = create_test_state();
        seed_kitchen(&state);
        let service = &state.change_order_service;

        let co = service
            .create(
                "P1",
                NewChangeOrder {
                    title: "Add crown".to_string(),
                    ..Default::default()
                },
                "pm",
            )
            .unwrap();
        let stale = service.find_by_id(&co.change_order_id).unwrap().unwrap();

        service.submit_for_approval(&co.change_order_id, "pm").unwrap();

        // 以过期快照再次迁移
        let mut conn = state.conn.lock().unwrap();
        let tx = conn.transaction().unwrap();
        let mut attempt = stale.clone();
        attempt.status = ChangeOrderStatus::PendingApproval;
        let err = ChangeOrderRepository::transition_tx(&tx, &attempt, ChangeOrderStatus::Draft).unwrap_err();
        assert!(matches!(err, RepositoryError::OptimisticLockFailure { .. }));

        let mapped: ChangeOrderError = err.into();
        assert!(matches!(
            mapped,
            ChangeOrderError::ConcurrentModification { ref change_order_id } if *change_order_id == co.change_order_id
        ));
    }

    #[test]
    fn test_parallel_approvals_only_one_wins() {
        let (_tmp, state) = create_test_state();
        seed_kitchen(&state);
        {
            let conn = state.conn.lock().unwrap();
            seed_task(&conn, "T1", "P1", "pending");
            seed_task(&conn, "T2", "P1", "pending");
        }
        let service = state.change_order_service.clone();

        let co = service
            .create(
                "P1",
                NewChangeOrder {
                    title: "Add crown".to_string(),
                    ..Default::default()
                },
                "pm",
            )
            .unwrap();
        service.submit_for_approval(&co.change_order_id, "pm").unwrap();

        let id = Arc::new(co.change_order_id.clone());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                let id = id.clone();
                thread::spawn(move || service.approve(&id, &format!("approver-{}", i), None))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ChangeOrderError::InvalidTransition { from: ChangeOrderStatus::Approved, .. })));

        // 止停动作只执行一次
        assert_eq!(query_i64(&state, "SELECT COUNT(*) FROM change_order_stop_action"), 3);
        assert_eq!(
            query_i64(&state, "SELECT COUNT(*) FROM action_log WHERE action_type = 'EXECUTE_STOP_ACTIONS'"),
            1
        );
    }

    #[test]
    fn test_parallel_apply_and_cancel() {
        let (_tmp, state) = create_test_state();
        seed_kitchen(&state);
        let service = state.change_order_service.clone();

        let co = service
            .create(
                "P1",
                NewChangeOrder {
                    title: "Add crown".to_string(),
                    ..Default::default()
                },
                "pm",
            )
            .unwrap();
        service.submit_for_approval(&co.change_order_id, "pm").unwrap();
        service.approve(&co.change_order_id, "owner", None).unwrap();

        let apply = {
            let service = service.clone();
            let id = co.change_order_id.clone();
            thread::spawn(move || service.apply(&id, "shop").map(|o| o.change_order.status))
        };
        let cancel = {
            let service = service.clone();
            let id = co.change_order_id.clone();
            thread::spawn(move || service.cancel(&id, "owner").map(|o| o.change_order.status))
        };

        let outcomes = [apply.join().unwrap(), cancel.join().unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);

        let stored = service.find_by_id(&co.change_order_id).unwrap().unwrap();
        assert!(stored.is_complete());
        // 任一路径都撤销了止停动作, 且只撤销一次
        assert_eq!(
            query_i64(&state, "SELECT COUNT(*) FROM change_order_stop_action WHERE reverted_at IS NULL"),
            0
        );
        assert_eq!(
            query_i64(&state, "SELECT COUNT(*) FROM action_log WHERE action_type = 'REVERT_STOP_ACTIONS'"),
            1
        );
    }
}
