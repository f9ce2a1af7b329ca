// ==========================================
// 定制橱柜车间 ERP - 项目 / 任务 / 采购单仓储
// ==========================================
// 职责: 止停级联所需的读写 (阻断/恢复任务, 挂起/释放采购单, 项目标记)
// 红线: 只做数据映射, 可阻断/可挂起的状态集合由调用方传入
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::sync::{Arc, Mutex};

use crate::db::format_ts;
use crate::domain::project::{Project, PurchaseOrder, Task};
use crate::domain::types::{PurchaseOrderState, TaskState};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_codec::{enum_at, opt_ts_at, ts_at};

const PROJECT_COLUMNS: &str = r#"
    project_id, name, project_number, stage_key,
    has_pending_change_order, active_change_order_id, delivery_blocked, updated_at
"#;

const TASK_COLUMNS: &str =
    "task_id, project_id, title, state, blocked_by_change_order_id, state_before_block";

const PO_COLUMNS: &str = r#"
    purchase_order_id, project_id, origin, state,
    held_by_change_order_id, held_at, held_by, state_before_hold
"#;

/// 生成 "?2, ?3, ..." 占位符 (从 start 开始编号)
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 转义 LIKE 通配符 (配合 ESCAPE '\\')
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub struct ProjectRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProjectRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_project(&self, project_id: &str) -> RepositoryResult<Option<Project>> {
        let conn = self.get_conn()?;
        Self::find_project_tx(&conn, project_id)
    }

    pub fn find_task(&self, task_id: &str) -> RepositoryResult<Option<Task>> {
        let conn = self.get_conn()?;
        Self::find_task_tx(&conn, task_id)
    }

    pub fn find_purchase_order(&self, purchase_order_id: &str) -> RepositoryResult<Option<PurchaseOrder>> {
        let conn = self.get_conn()?;
        Self::find_purchase_order_tx(&conn, purchase_order_id)
    }

    // ==========================================
    // 项目
    // ==========================================

    pub fn find_project_tx(conn: &Connection, project_id: &str) -> RepositoryResult<Option<Project>> {
        let sql = format!("SELECT {} FROM project WHERE project_id = ?1", PROJECT_COLUMNS);
        Ok(conn.query_row(&sql, params![project_id], map_project).optional()?)
    }

    pub fn get_project_tx(conn: &Connection, project_id: &str) -> RepositoryResult<Project> {
        Self::find_project_tx(conn, project_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "Project".to_string(),
            id: project_id.to_string(),
        })
    }

    /// 标记项目进入变更级联
    pub fn mark_cascading_tx(tx: &Transaction, project_id: &str, change_order_id: &str) -> RepositoryResult<()> {
        tx.execute(
            r#"
            UPDATE project
            SET has_pending_change_order = 1, active_change_order_id = ?1,
                updated_at = datetime('now', 'localtime')
            WHERE project_id = ?2
            "#,
            params![change_order_id, project_id],
        )?;
        Ok(())
    }

    /// 设置交付阻断标记; 已阻断时不变, 返回是否发生变化
    pub fn block_delivery_tx(tx: &Transaction, project_id: &str) -> RepositoryResult<bool> {
        let rows = tx.execute(
            r#"
            UPDATE project SET delivery_blocked = 1, updated_at = datetime('now', 'localtime')
            WHERE project_id = ?1 AND delivery_blocked = 0
            "#,
            params![project_id],
        )?;
        Ok(rows > 0)
    }

    pub fn unblock_delivery_tx(tx: &Transaction, project_id: &str) -> RepositoryResult<bool> {
        let rows = tx.execute(
            r#"
            UPDATE project SET delivery_blocked = 0, updated_at = datetime('now', 'localtime')
            WHERE project_id = ?1 AND delivery_blocked = 1
            "#,
            params![project_id],
        )?;
        Ok(rows > 0)
    }

    /// 清除级联标记 (仅当指针为本变更单, 或指针为空但仍残留待处理标记)
    pub fn clear_cascading_tx(tx: &Transaction, project_id: &str, change_order_id: &str) -> RepositoryResult<bool> {
        let rows = tx.execute(
            r#"
            UPDATE project
            SET has_pending_change_order = 0, active_change_order_id = NULL, delivery_blocked = 0,
                updated_at = datetime('now', 'localtime')
            WHERE project_id = ?1
              AND (active_change_order_id = ?2
                   OR (active_change_order_id IS NULL AND has_pending_change_order = 1))
            "#,
            params![project_id, change_order_id],
        )?;
        Ok(rows > 0)
    }

    // ==========================================
    // 任务
    // ==========================================

    pub fn find_task_tx(conn: &Connection, task_id: &str) -> RepositoryResult<Option<Task>> {
        let sql = format!("SELECT {} FROM task WHERE task_id = ?1", TASK_COLUMNS);
        Ok(conn.query_row(&sql, params![task_id], map_task).optional()?)
    }

    /// 项目中处于给定状态且未被任何变更单阻断的任务
    pub fn find_blockable_tasks_tx(
        conn: &Connection,
        project_id: &str,
        states: &[TaskState],
    ) -> RepositoryResult<Vec<Task>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {} FROM task
            WHERE project_id = ?1 AND state IN ({}) AND blocked_by_change_order_id IS NULL
            ORDER BY task_id ASC
            "#,
            TASK_COLUMNS,
            placeholders(2, states.len())
        );

        let mut values: Vec<String> = vec![project_id.to_string()];
        values.extend(states.iter().map(|s| s.as_str().to_string()));

        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params_from_iter(values.iter()), map_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// 阻断任务 (条件: 未被阻断)
    pub fn block_task_tx(
        tx: &Transaction,
        task_id: &str,
        change_order_id: &str,
        state_before: TaskState,
    ) -> RepositoryResult<bool> {
        let rows = tx.execute(
            r#"
            UPDATE task
            SET state = ?1, blocked_by_change_order_id = ?2, state_before_block = ?3,
                updated_at = datetime('now', 'localtime')
            WHERE task_id = ?4 AND blocked_by_change_order_id IS NULL
            "#,
            params![TaskState::Blocked.as_str(), change_order_id, state_before.as_str(), task_id],
        )?;
        Ok(rows > 0)
    }

    /// 恢复任务状态并清除阻断指针
    pub fn unblock_task_tx(tx: &Transaction, task_id: &str, restore_to: TaskState) -> RepositoryResult<bool> {
        let rows = tx.execute(
            r#"
            UPDATE task
            SET state = ?1, blocked_by_change_order_id = NULL, state_before_block = NULL,
                updated_at = datetime('now', 'localtime')
            WHERE task_id = ?2
            "#,
            params![restore_to.as_str(), task_id],
        )?;
        Ok(rows > 0)
    }

    // ==========================================
    // 采购单
    // ==========================================

    pub fn find_purchase_order_tx(conn: &Connection, purchase_order_id: &str) -> RepositoryResult<Option<PurchaseOrder>> {
        let sql = format!("SELECT {} FROM purchase_order WHERE purchase_order_id = ?1", PO_COLUMNS);
        Ok(conn.query_row(&sql, params![purchase_order_id], map_purchase_order).optional()?)
    }

    /// 通过外键 project_id 关联的可挂起采购单
    pub fn find_holdable_purchase_orders_tx(
        conn: &Connection,
        project_id: &str,
        states: &[PurchaseOrderState],
    ) -> RepositoryResult<Vec<PurchaseOrder>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT {} FROM purchase_order
            WHERE project_id = ?1 AND state IN ({}) AND held_by_change_order_id IS NULL
            ORDER BY purchase_order_id ASC
            "#,
            PO_COLUMNS,
            placeholders(2, states.len())
        );

        let mut values: Vec<String> = vec![project_id.to_string()];
        values.extend(states.iter().map(|s| s.as_str().to_string()));

        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map(params_from_iter(values.iter()), map_purchase_order)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// 历史数据兜底: 未填 project_id 的采购单按 origin 文本匹配项目名称/编号
    ///
    /// 这是启发式匹配, 仅在配置开启时由调用方使用
    pub fn find_holdable_purchase_orders_by_origin_tx(
        conn: &Connection,
        project: &Project,
        states: &[PurchaseOrderState],
    ) -> RepositoryResult<Vec<PurchaseOrder>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let mut needles: Vec<String> = Vec::new();
        if !project.name.trim().is_empty() {
            needles.push(escape_like(project.name.trim()));
        }
        if let Some(number) = project.project_number.as_deref().map(str::trim) {
            if !number.is_empty() {
                needles.push(escape_like(number));
            }
        }
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        let state_ph = placeholders(1, states.len());
        let origin_clause = (0..needles.len())
            .map(|i| format!("origin LIKE '%' || ?{} || '%' ESCAPE '\\'", states.len() + 1 + i))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            r#"
            SELECT {} FROM purchase_order
            WHERE project_id IS NULL AND origin IS NOT NULL
              AND state IN ({}) AND held_by_change_order_id IS NULL
              AND ({})
            ORDER BY purchase_order_id ASC
            "#,
            PO_COLUMNS, state_ph, origin_clause
        );

        let mut values: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        values.extend(needles);

        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map(params_from_iter(values.iter()), map_purchase_order)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// 挂起采购单 (条件: 未被挂起)
    pub fn hold_purchase_order_tx(
        tx: &Transaction,
        purchase_order_id: &str,
        change_order_id: &str,
        held_by: &str,
        held_at: &NaiveDateTime,
        state_before: PurchaseOrderState,
    ) -> RepositoryResult<bool> {
        let rows = tx.execute(
            r#"
            UPDATE purchase_order
            SET state = ?1, held_by_change_order_id = ?2, held_at = ?3, held_by = ?4,
                state_before_hold = ?5, updated_at = datetime('now', 'localtime')
            WHERE purchase_order_id = ?6 AND held_by_change_order_id IS NULL
            "#,
            params![
                PurchaseOrderState::OnHold.as_str(),
                change_order_id,
                format_ts(held_at),
                held_by,
                state_before.as_str(),
                purchase_order_id,
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn release_purchase_order_tx(
        tx: &Transaction,
        purchase_order_id: &str,
        restore_to: PurchaseOrderState,
    ) -> RepositoryResult<bool> {
        let rows = tx.execute(
            r#"
            UPDATE purchase_order
            SET state = ?1, held_by_change_order_id = NULL, held_at = NULL, held_by = NULL,
                state_before_hold = NULL, updated_at = datetime('now', 'localtime')
            WHERE purchase_order_id = ?2
            "#,
            params![restore_to.as_str(), purchase_order_id],
        )?;
        Ok(rows > 0)
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_project(row: &Row) -> rusqlite::Result<Project> {
    let has_pending: i64 = row.get(4)?;
    let delivery_blocked: i64 = row.get(6)?;
    Ok(Project {
        project_id: row.get(0)?,
        name: row.get(1)?,
        project_number: row.get(2)?,
        stage_key: row.get(3)?,
        has_pending_change_order: has_pending != 0,
        active_change_order_id: row.get(5)?,
        delivery_blocked: delivery_blocked != 0,
        updated_at: ts_at(row, 7)?,
    })
}

fn map_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        task_id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        state: enum_at(row, 3, TaskState::parse)?,
        blocked_by_change_order_id: row.get(4)?,
        state_before_block: row.get(5)?,
    })
}

fn map_purchase_order(row: &Row) -> rusqlite::Result<PurchaseOrder> {
    Ok(PurchaseOrder {
        purchase_order_id: row.get(0)?,
        project_id: row.get(1)?,
        origin: row.get(2)?,
        state: enum_at(row, 3, PurchaseOrderState::parse)?,
        held_by_change_order_id: row.get(4)?,
        held_at: opt_ts_at(row, 5)?,
        held_by: row.get(6)?,
        state_before_hold: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema, now_ts};

    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO project (project_id, name, project_number) VALUES ('P1', 'Smith Kitchen', 'TCS-0042');
            INSERT INTO project (project_id, name, project_number) VALUES ('P2', 'Jones Bath', 'TCS-0043');
            INSERT INTO task (task_id, project_id, title, state) VALUES ('T1', 'P1', 'Cut boxes', 'pending');
            INSERT INTO task (task_id, project_id, title, state) VALUES ('T2', 'P1', 'Edge band', 'in_progress');
            INSERT INTO task (task_id, project_id, title, state) VALUES ('T3', 'P1', 'Install', 'done');
            INSERT INTO task (task_id, project_id, title, state) VALUES ('T4', 'P2', 'Cut boxes', 'pending');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO1', 'P1', NULL, 'sent');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO2', 'P1', NULL, 'done');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO3', NULL, 'Hardware for TCS-0042', 'draft');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO4', NULL, 'Jones Bath', 'draft');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO5', 'P2', 'Smith Kitchen', 'draft');
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_blockable_tasks_filters_state_and_project() {
        let conn = setup_test_db();
        let tasks = ProjectRepository::find_blockable_tasks_tx(&conn, "P1", &TaskState::INTERRUPTIBLE).unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
    }

    #[test]
    fn test_block_and_unblock_task() {
        let mut conn = setup_test_db();
        let tx = conn.transaction().unwrap();
        assert!(ProjectRepository::block_task_tx(&tx, "T1", "CO1", TaskState::Pending).unwrap());
        // 已阻断的任务不可被再次阻断
        assert!(!ProjectRepository::block_task_tx(&tx, "T1", "CO2", TaskState::Blocked).unwrap());

        let task = ProjectRepository::find_task_tx(&tx, "T1").unwrap().unwrap();
        assert_eq!(task.state, TaskState::Blocked);
        assert_eq!(task.blocked_by_change_order_id.as_deref(), Some("CO1"));
        assert_eq!(task.state_before_block.as_deref(), Some("pending"));

        let remaining = ProjectRepository::find_blockable_tasks_tx(&tx, "P1", &TaskState::INTERRUPTIBLE).unwrap();
        assert_eq!(remaining.len(), 1);

        ProjectRepository::unblock_task_tx(&tx, "T1", TaskState::Pending).unwrap();
        let task = ProjectRepository::find_task_tx(&tx, "T1").unwrap().unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.blocked_by_change_order_id.is_none());
    }

    #[test]
    fn test_purchase_order_linking_by_fk_and_origin() {
        let conn = setup_test_db();
        let by_fk =
            ProjectRepository::find_holdable_purchase_orders_tx(&conn, "P1", &PurchaseOrderState::HOLDABLE).unwrap();
        assert_eq!(by_fk.len(), 1);
        assert_eq!(by_fk[0].purchase_order_id, "PO1");

        // 只匹配未关联项目的历史采购单; PO5 虽然 origin 命中但已有外键
        let project = ProjectRepository::get_project_tx(&conn, "P1").unwrap();
        let by_origin = ProjectRepository::find_holdable_purchase_orders_by_origin_tx(
            &conn,
            &project,
            &PurchaseOrderState::HOLDABLE,
        )
        .unwrap();
        let ids: Vec<_> = by_origin.iter().map(|p| p.purchase_order_id.as_str()).collect();
        assert_eq!(ids, vec!["PO3"]);
    }

    #[test]
    fn test_origin_match_treats_wildcards_literally() {
        let conn = setup_test_db();
        conn.execute_batch(
            r#"
            INSERT INTO project (project_id, name) VALUES ('P3', '100%_Oak');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO6', NULL, 'Doors 100%_Oak uppers', 'draft');
            INSERT INTO purchase_order (purchase_order_id, project_id, origin, state) VALUES ('PO7', NULL, '100 pct red XOak', 'draft');
            "#,
        )
        .unwrap();

        let project = ProjectRepository::get_project_tx(&conn, "P3").unwrap();
        let by_origin = ProjectRepository::find_holdable_purchase_orders_by_origin_tx(
            &conn,
            &project,
            &PurchaseOrderState::HOLDABLE,
        )
        .unwrap();
        let ids: Vec<_> = by_origin.iter().map(|p| p.purchase_order_id.as_str()).collect();
        assert_eq!(ids, vec!["PO6"]);
        assert_eq!(escape_like(r"a%b_c\d"), r"a\%b\_c\\d");
    }

    #[test]
    fn test_hold_release_and_project_flags() {
        let mut conn = setup_test_db();
        let tx = conn.transaction().unwrap();
        let now = now_ts();
        assert!(ProjectRepository::hold_purchase_order_tx(&tx, "PO1", "CO1", "u1", &now, PurchaseOrderState::Sent).unwrap());
        let po = ProjectRepository::find_purchase_order_tx(&tx, "PO1").unwrap().unwrap();
        assert_eq!(po.state, PurchaseOrderState::OnHold);
        assert_eq!(po.held_by.as_deref(), Some("u1"));

        ProjectRepository::release_purchase_order_tx(&tx, "PO1", PurchaseOrderState::Sent).unwrap();
        let po = ProjectRepository::find_purchase_order_tx(&tx, "PO1").unwrap().unwrap();
        assert_eq!(po.state, PurchaseOrderState::Sent);
        assert!(po.held_at.is_none());

        ProjectRepository::mark_cascading_tx(&tx, "P1", "CO1").unwrap();
        assert!(ProjectRepository::block_delivery_tx(&tx, "P1").unwrap());
        assert!(!ProjectRepository::block_delivery_tx(&tx, "P1").unwrap());

        // 其他变更单不能清除本项目标记
        assert!(!ProjectRepository::clear_cascading_tx(&tx, "P1", "CO2").unwrap());
        assert!(ProjectRepository::clear_cascading_tx(&tx, "P1", "CO1").unwrap());
        let project = ProjectRepository::get_project_tx(&tx, "P1").unwrap();
        assert!(!project.delivery_blocked);
        assert!(project.active_change_order_id.is_none());
        assert!(!project.has_pending_change_order);
    }
}
