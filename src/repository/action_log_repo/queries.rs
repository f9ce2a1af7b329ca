use super::core::ActionLogRepository;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::repository::error::RepositoryResult;
use crate::repository::row_codec::ts_at;
use rusqlite::{params, Result as SqliteResult, Row};

const ACTION_LOG_COLUMNS: &str = r#"
    action_id, change_order_id, project_id, action_type,
    action_ts, actor, payload_json, detail
"#;

impl ActionLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 action_id 查询单个日志
    pub fn find_by_id(&self, action_id: &str) -> RepositoryResult<Option<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM action_log WHERE action_id = ?", ACTION_LOG_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        match stmt.query_row(params![action_id], |row| self.map_row(row)) {
            Ok(log) => Ok(Some(log)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 变更单的完整操作轨迹 (时间正序)
    pub fn find_by_change_order(&self, change_order_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM action_log WHERE change_order_id = ? ORDER BY action_ts ASC, rowid ASC",
            ACTION_LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![change_order_id], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 项目下指定类型的操作日志 (最近优先)
    pub fn find_by_project_and_type(
        &self,
        project_id: &str,
        action_type: ActionType,
        limit: i32,
    ) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM action_log
            WHERE project_id = ? AND action_type = ?
            ORDER BY action_ts DESC, rowid DESC
            LIMIT ?
            "#,
            ACTION_LOG_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![project_id, action_type.as_str(), limit], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }

    /// 统计变更单某类操作的次数
    pub fn count_by_change_order_and_type(
        &self,
        change_order_id: &str,
        action_type: ActionType,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM action_log WHERE change_order_id = ? AND action_type = ?",
            params![change_order_id, action_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    /// 映射数据库行到 ActionLog 实体
    fn map_row(&self, row: &Row) -> SqliteResult<ActionLog> {
        let payload_raw: Option<String> = row.get(6)?;
        Ok(ActionLog {
            action_id: row.get(0)?,
            change_order_id: row.get(1)?,
            project_id: row.get(2)?,
            action_type: row.get(3)?,
            action_ts: ts_at(row, 4)?,
            actor: row.get(5)?,
            payload_json: payload_raw.and_then(|s| serde_json::from_str(&s).ok()),
            detail: row.get(7)?,
        })
    }
}
