// ==========================================
// 定制橱柜车间 ERP - 止停动作服务
// ==========================================
// 职责:
// - 批准时: 阻断任务 / 挂起采购单 / 阻断交付, 并逐条写入可撤销的审计记录
// - 应用或取消时: 按审计记录恢复原状态, 标记撤销
// 红线: 执行与撤销都在单一事务内完成
// 红线: 撤销幂等, 第二次调用不产生任何写入
// 红线: 目标实体缺失只告警跳过, 不中断批量处理
// ==========================================

use rusqlite::{Connection, Transaction};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::{ChangeOrderSettings, ConfigManager};
use crate::db::now_ts;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::change_order::ChangeOrder;
use crate::domain::stop_action::{
    ActiveStopActions, ChangeOrderStopAction, RevertSummary, StopActionSummary,
};
use crate::domain::types::{ChangeOrderStatus, PurchaseOrderState, StopActionType, TaskState};
use crate::engine::error::{ChangeOrderError, ChangeOrderResult};
use crate::repository::{
    ActionLogRepository, ChangeOrderRepository, ProjectRepository, RepositoryError,
    StopActionRepository,
};

/// 交付阻断记录的前后状态
const DELIVERY_NOT_BLOCKED: &str = "not_blocked";
const DELIVERY_BLOCKED: &str = "blocked";

pub struct StopActionService {
    conn: Arc<Mutex<Connection>>,
    config: Arc<ConfigManager>,
}

impl StopActionService {
    pub fn new(conn: Arc<Mutex<Connection>>, config: Arc<ConfigManager>) -> Self {
        Self { conn, config }
    }

    fn lock_conn(&self) -> ChangeOrderResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()).into())
    }

    // ==========================================
    // 独立入口 (自带事务)
    // ==========================================

    /// 为已批准的变更单执行止停动作
    ///
    /// 正常流程由 ChangeOrderService::approve 在批准事务内调用 `execute_stop_actions_tx`;
    /// 此入口用于补执行, 已阻断/已挂起的实体会被跳过
    pub fn execute_stop_actions(&self, change_order_id: &str, actor: &str) -> ChangeOrderResult<StopActionSummary> {
        let settings = self
            .config
            .load_settings()
            .map_err(|e| ChangeOrderError::Config(e.to_string()))?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let co = ChangeOrderRepository::get_tx(&tx, change_order_id)?;
        if co.status != ChangeOrderStatus::Approved {
            return Err(ChangeOrderError::InvalidTransition {
                change_order_id: co.change_order_id,
                from: co.status,
                action: "execute_stop_actions",
            });
        }

        let summary = Self::execute_stop_actions_tx(&tx, &co, actor, &settings)?;
        tx.commit()?;
        Ok(summary)
    }

    /// 撤销变更单的全部有效止停动作 (幂等)
    pub fn revert_stop_actions(&self, change_order_id: &str, actor: &str) -> ChangeOrderResult<RevertSummary> {
        let settings = self
            .config
            .load_settings()
            .map_err(|e| ChangeOrderError::Config(e.to_string()))?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let co = ChangeOrderRepository::get_tx(&tx, change_order_id)?;
        let summary = Self::revert_stop_actions_tx(&tx, &co, actor, &settings)?;
        tx.commit()?;
        Ok(summary)
    }

    /// 有效止停动作统计 (只读)
    pub fn get_stop_actions_summary(&self, change_order_id: &str) -> ChangeOrderResult<ActiveStopActions> {
        let conn = self.lock_conn()?;
        ChangeOrderRepository::get_tx(&conn, change_order_id)?;
        Ok(StopActionRepository::summary_tx(&conn, change_order_id)?)
    }

    /// 变更单全部止停记录 (含已撤销)
    pub fn list_stop_actions(&self, change_order_id: &str) -> ChangeOrderResult<Vec<ChangeOrderStopAction>> {
        // StopActionRepository 自带锁, 不可在持锁时调用
        let repo = StopActionRepository::new(self.conn.clone());
        Ok(repo.list_for_change_order(change_order_id)?)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    /// 执行止停动作
    ///
    /// 顺序: 阻断任务 → 挂起采购单 → 阻断交付 → 更新项目级联指针
    pub fn execute_stop_actions_tx(
        tx: &Transaction,
        co: &ChangeOrder,
        actor: &str,
        settings: &ChangeOrderSettings,
    ) -> ChangeOrderResult<StopActionSummary> {
        let project = ProjectRepository::get_project_tx(tx, &co.project_id)?;
        let mut summary = StopActionSummary::default();

        // ===== 1. 阻断任务 =====
        let tasks = ProjectRepository::find_blockable_tasks_tx(tx, &project.project_id, &TaskState::INTERRUPTIBLE)?;
        for task in tasks {
            if !ProjectRepository::block_task_tx(tx, &task.task_id, &co.change_order_id, task.state)? {
                continue;
            }
            let action = ChangeOrderStopAction::new(
                &co.change_order_id,
                StopActionType::TaskBlocked,
                &task.task_id,
                Some(task.state.as_str().to_string()),
                TaskState::Blocked.as_str(),
                actor,
            );
            StopActionRepository::insert_tx(tx, &action)?;
            summary.tasks_blocked += 1;
        }

        // ===== 2. 挂起采购单 =====
        let mut orders = ProjectRepository::find_holdable_purchase_orders_tx(
            tx,
            &project.project_id,
            &PurchaseOrderState::HOLDABLE,
        )?;
        if settings.po_legacy_origin_match {
            let legacy = ProjectRepository::find_holdable_purchase_orders_by_origin_tx(
                tx,
                &project,
                &PurchaseOrderState::HOLDABLE,
            )?;
            if !legacy.is_empty() {
                warn!(
                    change_order_id = %co.change_order_id,
                    project_id = %project.project_id,
                    count = legacy.len(),
                    "采购单按 origin 文本兜底匹配到项目 (未填 project_id 的历史数据)"
                );
            }
            let mut seen: HashSet<String> = orders.iter().map(|o| o.purchase_order_id.clone()).collect();
            orders.extend(legacy.into_iter().filter(|o| seen.insert(o.purchase_order_id.clone())));
        }

        let held_at = now_ts();
        for po in orders {
            if !ProjectRepository::hold_purchase_order_tx(
                tx,
                &po.purchase_order_id,
                &co.change_order_id,
                actor,
                &held_at,
                po.state,
            )? {
                continue;
            }
            let action = ChangeOrderStopAction::new(
                &co.change_order_id,
                StopActionType::PoHeld,
                &po.purchase_order_id,
                Some(po.state.as_str().to_string()),
                PurchaseOrderState::OnHold.as_str(),
                actor,
            );
            StopActionRepository::insert_tx(tx, &action)?;
            summary.pos_held += 1;
        }

        // ===== 3. 阻断交付 (已阻断则跳过) =====
        if ProjectRepository::block_delivery_tx(tx, &project.project_id)? {
            let action = ChangeOrderStopAction::new(
                &co.change_order_id,
                StopActionType::DeliveryBlocked,
                &project.project_id,
                Some(DELIVERY_NOT_BLOCKED.to_string()),
                DELIVERY_BLOCKED,
                actor,
            );
            StopActionRepository::insert_tx(tx, &action)?;
            summary.delivery_blocked = true;
        }

        // ===== 4. 项目级联指针 =====
        ProjectRepository::mark_cascading_tx(tx, &project.project_id, &co.change_order_id)?;

        let log = ActionLog::new(ActionType::ExecuteStopActions, actor)
            .for_change_order(&co.change_order_id, &co.project_id)
            .with_payload(&summary)
            .with_detail(format!(
                "执行止停动作: 阻断任务 {} 个, 挂起采购单 {} 张, 阻断交付={}",
                summary.tasks_blocked, summary.pos_held, summary.delivery_blocked
            ));
        ActionLogRepository::insert_tx(tx, &log)?;

        info!(
            change_order_id = %co.change_order_id,
            project_id = %co.project_id,
            actor = %actor,
            tasks_blocked = summary.tasks_blocked,
            pos_held = summary.pos_held,
            delivery_blocked = summary.delivery_blocked,
            "止停动作执行完成"
        );

        Ok(summary)
    }

    /// 撤销止停动作
    ///
    /// 对每条有效记录: 恢复目标实体 (缺失则仅标记) → 标记撤销;
    /// 再清除项目级联指针 (仅当指针仍指向本变更单).
    /// 项目内若还有其他 approved 变更单 (未强制单一生效时), 为最近批准的一张重新执行止停
    pub fn revert_stop_actions_tx(
        tx: &Transaction,
        co: &ChangeOrder,
        actor: &str,
        settings: &ChangeOrderSettings,
    ) -> ChangeOrderResult<RevertSummary> {
        let reverted_at = now_ts();
        let mut summary = RevertSummary::default();

        // ===== 任务 =====
        for action in StopActionRepository::find_active_tx(tx, &co.change_order_id, StopActionType::TaskBlocked)? {
            match ProjectRepository::find_task_tx(tx, &action.entity_id)? {
                None => {
                    warn!(
                        change_order_id = %co.change_order_id,
                        task_id = %action.entity_id,
                        "撤销止停: 任务已不存在, 仅标记撤销"
                    );
                    summary.missing_entities += 1;
                }
                Some(task) if is_held_by_other(task.blocked_by_change_order_id.as_deref(), &co.change_order_id) => {
                    warn!(
                        change_order_id = %co.change_order_id,
                        task_id = %task.task_id,
                        blocked_by = ?task.blocked_by_change_order_id,
                        "撤销止停: 任务已被其他变更单阻断, 不恢复状态"
                    );
                }
                Some(task) => {
                    let restore_to = action
                        .previous_state
                        .as_deref()
                        .and_then(TaskState::parse)
                        .unwrap_or(TaskState::Pending);
                    ProjectRepository::unblock_task_tx(tx, &task.task_id, restore_to)?;
                    summary.tasks_unblocked += 1;
                }
            }
            StopActionRepository::mark_reverted_tx(tx, &action.stop_action_id, actor, &reverted_at)?;
        }

        // ===== 采购单 =====
        for action in StopActionRepository::find_active_tx(tx, &co.change_order_id, StopActionType::PoHeld)? {
            match ProjectRepository::find_purchase_order_tx(tx, &action.entity_id)? {
                None => {
                    warn!(
                        change_order_id = %co.change_order_id,
                        purchase_order_id = %action.entity_id,
                        "撤销止停: 采购单已不存在, 仅标记撤销"
                    );
                    summary.missing_entities += 1;
                }
                Some(po) if is_held_by_other(po.held_by_change_order_id.as_deref(), &co.change_order_id) => {
                    warn!(
                        change_order_id = %co.change_order_id,
                        purchase_order_id = %po.purchase_order_id,
                        held_by = ?po.held_by_change_order_id,
                        "撤销止停: 采购单已被其他变更单挂起, 不恢复状态"
                    );
                }
                Some(po) => {
                    let restore_to = action
                        .previous_state
                        .as_deref()
                        .and_then(PurchaseOrderState::parse)
                        .unwrap_or(PurchaseOrderState::Draft);
                    ProjectRepository::release_purchase_order_tx(tx, &po.purchase_order_id, restore_to)?;
                    summary.pos_released += 1;
                }
            }
            StopActionRepository::mark_reverted_tx(tx, &action.stop_action_id, actor, &reverted_at)?;
        }

        // ===== 交付 =====
        for action in StopActionRepository::find_active_tx(tx, &co.change_order_id, StopActionType::DeliveryBlocked)? {
            match ProjectRepository::find_project_tx(tx, &action.entity_id)? {
                None => {
                    warn!(
                        change_order_id = %co.change_order_id,
                        project_id = %action.entity_id,
                        "撤销止停: 项目已不存在, 仅标记撤销"
                    );
                    summary.missing_entities += 1;
                }
                Some(project) => {
                    ProjectRepository::unblock_delivery_tx(tx, &project.project_id)?;
                    summary.delivery_unblocked = true;
                }
            }
            StopActionRepository::mark_reverted_tx(tx, &action.stop_action_id, actor, &reverted_at)?;
        }

        let cleared = ProjectRepository::clear_cascading_tx(tx, &co.project_id, &co.change_order_id)?;

        if summary.is_noop() && !cleared {
            tracing::debug!(change_order_id = %co.change_order_id, "撤销止停: 无有效记录, 跳过");
            return Ok(summary);
        }

        let log = ActionLog::new(ActionType::RevertStopActions, actor)
            .for_change_order(&co.change_order_id, &co.project_id)
            .with_payload(&json!({
                "tasks_unblocked": summary.tasks_unblocked,
                "pos_released": summary.pos_released,
                "delivery_unblocked": summary.delivery_unblocked,
                "missing_entities": summary.missing_entities,
                "project_flags_cleared": cleared,
            }))
            .with_detail(format!(
                "撤销止停动作: 恢复任务 {} 个, 释放采购单 {} 张, 解除交付阻断={}",
                summary.tasks_unblocked, summary.pos_released, summary.delivery_unblocked
            ));
        ActionLogRepository::insert_tx(tx, &log)?;

        info!(
            change_order_id = %co.change_order_id,
            project_id = %co.project_id,
            actor = %actor,
            tasks_unblocked = summary.tasks_unblocked,
            pos_released = summary.pos_released,
            delivery_unblocked = summary.delivery_unblocked,
            missing_entities = summary.missing_entities,
            "止停动作撤销完成"
        );

        // ===== 其他仍生效的变更单重新级联 =====
        if let Some(other) = ChangeOrderRepository::find_latest_approved_tx(tx, &co.project_id, &co.change_order_id)? {
            info!(
                change_order_id = %co.change_order_id,
                recascade_change_order_id = %other.change_order_id,
                "撤销止停: 项目仍有已批准的变更单, 重新执行其止停动作"
            );
            Self::execute_stop_actions_tx(tx, &other, actor, settings)?;
            summary.recascaded_change_order_id = Some(other.change_order_id);
        }

        Ok(summary)
    }
}

/// 实体当前是否被其他变更单占用
fn is_held_by_other(holder: Option<&str>, change_order_id: &str) -> bool {
    matches!(holder, Some(h) if h != change_order_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup() -> (Arc<Mutex<Connection>>, StopActionService) {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO project (project_id, name, project_number) VALUES ('P1', 'Smith Kitchen', 'TCS-0042');
            INSERT INTO task (task_id, project_id, title, state) VALUES ('T1', 'P1', 'Cut boxes', 'pending');
            INSERT INTO task (task_id, project_id, title, state) VALUES ('T2', 'P1', 'Edge band', 'in_progress');
            INSERT INTO task (task_id, project_id, title, state) VALUES ('T3', 'P1', 'Install', 'done');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO1', 'P1', NULL, 'purchase');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO2', NULL, 'TCS-0042 hinges', 'draft');
            INSERT INTO change_order (
                change_order_id, project_id, change_order_number, seq_no, title, reason, status,
                requested_by, requested_at, created_at, updated_at
            ) VALUES (
                'CO1', 'P1', 'CO-TCS-0042-001', 1, 'Widen sink base', 'client_request', 'approved',
                'u1', '2026-01-01 00:00:00', '2026-01-01 00:00:00', '2026-01-01 00:00:00'
            );
            "#,
        )
        .unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let config = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());
        let service = StopActionService::new(conn.clone(), config);
        (conn, service)
    }

    #[test]
    fn test_execute_blocks_tasks_pos_and_delivery() {
        let (conn, service) = setup();
        let summary = service.execute_stop_actions("CO1", "pm").unwrap();
        assert_eq!(summary.tasks_blocked, 2);
        // 外键关联 PO1 + origin 兜底匹配 PO2
        assert_eq!(summary.pos_held, 2);
        assert!(summary.delivery_blocked);

        let active = service.get_stop_actions_summary("CO1").unwrap();
        assert_eq!(active.total_active, 5);

        let guard = conn.lock().unwrap();
        let project = ProjectRepository::get_project_tx(&guard, "P1").unwrap();
        assert!(project.has_pending_change_order);
        assert_eq!(project.active_change_order_id.as_deref(), Some("CO1"));
        let t3 = ProjectRepository::find_task_tx(&guard, "T3").unwrap().unwrap();
        assert_eq!(t3.state, TaskState::Done);
    }

    #[test]
    fn test_execute_twice_does_not_duplicate() {
        let (_conn, service) = setup();
        service.execute_stop_actions("CO1", "pm").unwrap();
        let second = service.execute_stop_actions("CO1", "pm").unwrap();
        assert_eq!(second.total(), 0);
        assert_eq!(service.get_stop_actions_summary("CO1").unwrap().total_active, 5);
    }

    #[test]
    fn test_legacy_origin_match_can_be_disabled() {
        let (_conn, service) = setup();
        service
            .config
            .set_global_config_value(crate::config::config_keys::PO_LEGACY_ORIGIN_MATCH, "false")
            .unwrap();
        let summary = service.execute_stop_actions("CO1", "pm").unwrap();
        assert_eq!(summary.pos_held, 1);
    }

    #[test]
    fn test_revert_restores_and_is_idempotent() {
        let (conn, service) = setup();
        service.execute_stop_actions("CO1", "pm").unwrap();

        let first = service.revert_stop_actions("CO1", "pm").unwrap();
        assert_eq!(first.tasks_unblocked, 2);
        assert_eq!(first.pos_released, 2);
        assert!(first.delivery_unblocked);

        let second = service.revert_stop_actions("CO1", "pm").unwrap();
        assert!(second.is_noop());
        assert!(!service.get_stop_actions_summary("CO1").unwrap().has_active());

        {
            let guard = conn.lock().unwrap();
            let t2 = ProjectRepository::find_task_tx(&guard, "T2").unwrap().unwrap();
            assert_eq!(t2.state, TaskState::InProgress);
            let po1 = ProjectRepository::find_purchase_order_tx(&guard, "PO1").unwrap().unwrap();
            assert_eq!(po1.state, PurchaseOrderState::Purchase);
            let project = ProjectRepository::get_project_tx(&guard, "P1").unwrap();
            assert!(!project.delivery_blocked);
            assert!(project.active_change_order_id.is_none());
        }

        let logs = ActionLogRepository::new(conn.clone())
            .count_by_change_order_and_type("CO1", ActionType::RevertStopActions)
            .unwrap();
        assert_eq!(logs, 1);
    }

    #[test]
    fn test_revert_skips_missing_task() {
        let (conn, service) = setup();
        service.execute_stop_actions("CO1", "pm").unwrap();
        conn.lock().unwrap().execute("DELETE FROM task WHERE task_id = 'T1'", []).unwrap();

        let summary = service.revert_stop_actions("CO1", "pm").unwrap();
        assert_eq!(summary.missing_entities, 1);
        assert_eq!(summary.tasks_unblocked, 1);
        assert_eq!(service.get_stop_actions_summary("CO1").unwrap().total_active, 0);
    }

    #[test]
    fn test_execute_requires_approved() {
        let (conn, service) = setup();
        conn.lock()
            .unwrap()
            .execute("UPDATE change_order SET status = 'draft' WHERE change_order_id = 'CO1'", [])
            .unwrap();
        let err = service.execute_stop_actions("CO1", "pm").unwrap_err();
        assert!(matches!(err, ChangeOrderError::InvalidTransition { .. }));
    }
}
