// ==========================================
// 定制橱柜车间 ERP - 止停动作仓储
// ==========================================
// 对齐: change_order_stop_action 表
// 红线: 只追加 + 撤销标记, 不提供删除
// ==========================================

use rusqlite::{params, Connection, Row, Transaction};
use std::sync::{Arc, Mutex};

use crate::db::format_ts;
use crate::domain::stop_action::{ActiveStopActions, ChangeOrderStopAction};
use crate::domain::types::StopActionType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_codec::{enum_at, opt_ts_at, ts_at};

const STOP_ACTION_COLUMNS: &str = r#"
    stop_action_id, change_order_id, action_type, entity_type, entity_id,
    previous_state, new_state, performed_by, performed_at, reverted_by, reverted_at
"#;

pub struct StopActionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StopActionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 变更单的全部止停记录 (含已撤销)
    pub fn list_for_change_order(&self, change_order_id: &str) -> RepositoryResult<Vec<ChangeOrderStopAction>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM change_order_stop_action WHERE change_order_id = ?1 ORDER BY performed_at ASC, rowid ASC",
            STOP_ACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![change_order_id], map_stop_action)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn summary(&self, change_order_id: &str) -> RepositoryResult<ActiveStopActions> {
        let conn = self.get_conn()?;
        Self::summary_tx(&conn, change_order_id)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn insert_tx(tx: &Transaction, action: &ChangeOrderStopAction) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO change_order_stop_action (
                stop_action_id, change_order_id, action_type, entity_type, entity_id,
                previous_state, new_state, performed_by, performed_at, reverted_by, reverted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                action.stop_action_id,
                action.change_order_id,
                action.action_type.as_str(),
                action.entity_type,
                action.entity_id,
                action.previous_state,
                action.new_state,
                action.performed_by,
                format_ts(&action.performed_at),
                action.reverted_by,
                action.reverted_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    /// 某类有效 (未撤销) 记录
    pub fn find_active_tx(
        conn: &Connection,
        change_order_id: &str,
        action_type: StopActionType,
    ) -> RepositoryResult<Vec<ChangeOrderStopAction>> {
        let sql = format!(
            r#"
            SELECT {} FROM change_order_stop_action
            WHERE change_order_id = ?1 AND action_type = ?2 AND reverted_at IS NULL
            ORDER BY performed_at ASC, rowid ASC
            "#,
            STOP_ACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![change_order_id, action_type.as_str()], map_stop_action)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 标记撤销 (仅对有效记录生效, 返回影响行数)
    pub fn mark_reverted_tx(
        tx: &Transaction,
        stop_action_id: &str,
        reverted_by: &str,
        reverted_at: &chrono::NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let rows = tx.execute(
            r#"
            UPDATE change_order_stop_action
            SET reverted_by = ?1, reverted_at = ?2
            WHERE stop_action_id = ?3 AND reverted_at IS NULL
            "#,
            params![reverted_by, format_ts(reverted_at), stop_action_id],
        )?;
        Ok(rows)
    }

    /// 有效记录统计
    pub fn summary_tx(conn: &Connection, change_order_id: &str) -> RepositoryResult<ActiveStopActions> {
        let mut stmt = conn.prepare(
            r#"
            SELECT action_type, COUNT(*) FROM change_order_stop_action
            WHERE change_order_id = ?1 AND reverted_at IS NULL
            GROUP BY action_type
            "#,
        )?;
        let counts = stmt
            .query_map(params![change_order_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = ActiveStopActions::default();
        for (action_type, count) in counts {
            let count = count as usize;
            match StopActionType::parse(&action_type) {
                Some(StopActionType::TaskBlocked) => summary.tasks_blocked = count,
                Some(StopActionType::PoHeld) => summary.pos_held = count,
                Some(StopActionType::DeliveryBlocked) => summary.delivery_blocked = count > 0,
                None => {}
            }
            summary.total_active += count;
        }
        Ok(summary)
    }
}

fn map_stop_action(row: &Row) -> rusqlite::Result<ChangeOrderStopAction> {
    Ok(ChangeOrderStopAction {
        stop_action_id: row.get(0)?,
        change_order_id: row.get(1)?,
        action_type: enum_at(row, 2, StopActionType::parse)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        previous_state: row.get(5)?,
        new_state: row.get(6)?,
        performed_by: row.get(7)?,
        performed_at: ts_at(row, 8)?,
        reverted_by: row.get(9)?,
        reverted_at: opt_ts_at(row, 10)?,
    })
}
