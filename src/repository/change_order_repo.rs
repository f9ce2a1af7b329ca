// ==========================================
// 定制橱柜车间 ERP - 变更单数据仓储
// ==========================================
// 对齐: change_order / change_order_line 表
// 红线: Repository 不做业务逻辑,只做数据映射
// 红线: 汇总字段只能通过 recalculate_totals_tx 写入
// 并发: 状态迁移使用 (status, revision) 做 compare-and-swap
// ==========================================

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

use crate::db::format_ts;
use crate::domain::change_order::{aggregate_totals, BomDelta, BomImpact, ChangeOrder, ChangeOrderLine};
use crate::domain::types::{ChangeOrderReason, ChangeOrderStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_codec::{conversion_error, decimal_at, enum_at, opt_ts_at, ts_at};

const CHANGE_ORDER_COLUMNS: &str = r#"
    change_order_id, project_id, change_order_number, title, description,
    reason, status, affected_stage, unlocks_gate, price_delta, bom_delta_json,
    requested_by, requested_at, approved_by, approved_at, approval_notes,
    rejected_by, rejected_at, rejection_reason, applied_by, applied_at,
    cancelled_by, cancelled_at, revision, created_at, updated_at
"#;

const LINE_COLUMNS: &str = r#"
    line_id, change_order_id, line_no, entity_type, entity_id, field_name,
    old_value, new_value, price_impact, bom_impact_json, is_applied, applied_at, created_at
"#;

// ==========================================
// ChangeOrderRepository - 变更单仓储
// ==========================================
pub struct ChangeOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ChangeOrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询 (自带锁)
    // ==========================================

    pub fn find_by_id(&self, change_order_id: &str) -> RepositoryResult<Option<ChangeOrder>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, change_order_id)
    }

    /// 按项目列出变更单 (按编号升序)
    pub fn list_for_project(&self, project_id: &str) -> RepositoryResult<Vec<ChangeOrder>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM change_order WHERE project_id = ?1 ORDER BY seq_no ASC",
            CHANGE_ORDER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![project_id], map_change_order)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_lines(&self, change_order_id: &str) -> RepositoryResult<Vec<ChangeOrderLine>> {
        let conn = self.get_conn()?;
        Self::find_lines_tx(&conn, change_order_id)
    }

    // ==========================================
    // 事务内操作 (调用方持有连接/事务)
    // ==========================================

    pub fn find_by_id_tx(conn: &Connection, change_order_id: &str) -> RepositoryResult<Option<ChangeOrder>> {
        let sql = format!(
            "SELECT {} FROM change_order WHERE change_order_id = ?1",
            CHANGE_ORDER_COLUMNS
        );
        let found = conn
            .query_row(&sql, params![change_order_id], map_change_order)
            .optional()?;
        Ok(found)
    }

    /// 读取变更单, 不存在时返回 NotFound
    pub fn get_tx(conn: &Connection, change_order_id: &str) -> RepositoryResult<ChangeOrder> {
        Self::find_by_id_tx(conn, change_order_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "ChangeOrder".to_string(),
            id: change_order_id.to_string(),
        })
    }

    /// 项目内最近批准、仍处于 approved 的另一张变更单
    pub fn find_latest_approved_tx(
        conn: &Connection,
        project_id: &str,
        excluding: &str,
    ) -> RepositoryResult<Option<ChangeOrder>> {
        let sql = format!(
            r#"
            SELECT {} FROM change_order
            WHERE project_id = ?1 AND status = ?2 AND change_order_id != ?3
            ORDER BY approved_at DESC, seq_no DESC
            LIMIT 1
            "#,
            CHANGE_ORDER_COLUMNS
        );
        let found = conn
            .query_row(
                &sql,
                params![project_id, ChangeOrderStatus::Approved.as_str(), excluding],
                map_change_order,
            )
            .optional()?;
        Ok(found)
    }

    /// 项目内下一个流水号 (需在写事务内调用以保证原子性)
    pub fn next_seq_no_tx(tx: &Transaction, project_id: &str) -> RepositoryResult<i32> {
        let max_seq: Option<i32> = tx.query_row(
            "SELECT MAX(seq_no) FROM change_order WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(max_seq.unwrap_or(0) + 1)
    }

    pub fn insert_tx(tx: &Transaction, co: &ChangeOrder, seq_no: i32) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO change_order (
                change_order_id, project_id, change_order_number, seq_no, title, description,
                reason, status, affected_stage, unlocks_gate, price_delta, bom_delta_json,
                requested_by, requested_at, revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                co.change_order_id,
                co.project_id,
                co.change_order_number,
                seq_no,
                co.title,
                co.description,
                co.reason.as_str(),
                co.status.as_str(),
                co.affected_stage,
                co.unlocks_gate,
                co.price_delta.to_string(),
                serde_json::to_string(&co.bom_delta)?,
                co.requested_by,
                format_ts(&co.requested_at),
                co.revision,
                format_ts(&co.created_at),
                format_ts(&co.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 状态迁移 (compare-and-swap)
    ///
    /// # 参数
    /// - `co`: 已在内存中完成迁移的变更单 (status 为目标状态, revision 为读取时的值)
    /// - `expected_status`: 读取时的状态
    ///
    /// # 返回
    /// - Ok(new_revision)
    /// - Err(OptimisticLockFailure): 状态或 revision 已被其他请求修改
    pub fn transition_tx(
        tx: &Transaction,
        co: &ChangeOrder,
        expected_status: ChangeOrderStatus,
    ) -> RepositoryResult<i32> {
        let rows = tx.execute(
            r#"
            UPDATE change_order
            SET status = ?1,
                approved_by = ?2, approved_at = ?3, approval_notes = ?4,
                rejected_by = ?5, rejected_at = ?6, rejection_reason = ?7,
                applied_by = ?8, applied_at = ?9,
                cancelled_by = ?10, cancelled_at = ?11,
                updated_at = ?12,
                revision = revision + 1
            WHERE change_order_id = ?13 AND status = ?14 AND revision = ?15
            "#,
            params![
                co.status.as_str(),
                co.approved_by,
                co.approved_at.as_ref().map(format_ts),
                co.approval_notes,
                co.rejected_by,
                co.rejected_at.as_ref().map(format_ts),
                co.rejection_reason,
                co.applied_by,
                co.applied_at.as_ref().map(format_ts),
                co.cancelled_by,
                co.cancelled_at.as_ref().map(format_ts),
                format_ts(&co.updated_at),
                co.change_order_id,
                expected_status.as_str(),
                co.revision,
            ],
        )?;

        if rows == 0 {
            return Err(Self::cas_failure(tx, &co.change_order_id, co.revision));
        }
        Ok(co.revision + 1)
    }

    /// 判断是记录不存在还是并发冲突
    fn cas_failure(conn: &Connection, change_order_id: &str, expected: i32) -> RepositoryError {
        let actual: Result<Option<i32>, _> = conn
            .query_row(
                "SELECT revision FROM change_order WHERE change_order_id = ?1",
                params![change_order_id],
                |row| row.get(0),
            )
            .optional();

        match actual {
            Ok(Some(actual)) => RepositoryError::OptimisticLockFailure {
                change_order_id: change_order_id.to_string(),
                expected,
                actual,
            },
            Ok(None) => RepositoryError::NotFound {
                entity: "ChangeOrder".to_string(),
                id: change_order_id.to_string(),
            },
            Err(e) => e.into(),
        }
    }

    /// 按当前全部行项目重算汇总并写回 (revision + 1)
    pub fn recalculate_totals_tx(
        tx: &Transaction,
        change_order_id: &str,
    ) -> RepositoryResult<(Decimal, BomDelta)> {
        let lines = Self::find_lines_tx(tx, change_order_id)?;
        let (price_delta, bom_delta) = aggregate_totals(&lines);

        let rows = tx.execute(
            r#"
            UPDATE change_order
            SET price_delta = ?1, bom_delta_json = ?2, updated_at = ?3, revision = revision + 1
            WHERE change_order_id = ?4
            "#,
            params![
                price_delta.to_string(),
                serde_json::to_string(&bom_delta)?,
                format_ts(&crate::db::now_ts()),
                change_order_id,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ChangeOrder".to_string(),
                id: change_order_id.to_string(),
            });
        }

        Ok((price_delta, bom_delta))
    }

    // ==========================================
    // 行项目
    // ==========================================

    pub fn next_line_no_tx(tx: &Transaction, change_order_id: &str) -> RepositoryResult<i32> {
        let max_no: Option<i32> = tx.query_row(
            "SELECT MAX(line_no) FROM change_order_line WHERE change_order_id = ?1",
            params![change_order_id],
            |row| row.get(0),
        )?;
        Ok(max_no.unwrap_or(0) + 1)
    }

    pub fn insert_line_tx(tx: &Transaction, line: &ChangeOrderLine) -> RepositoryResult<()> {
        let bom_json = match &line.bom_impact {
            Some(impact) => Some(serde_json::to_string(impact)?),
            None => None,
        };

        tx.execute(
            r#"
            INSERT INTO change_order_line (
                line_id, change_order_id, line_no, entity_type, entity_id, field_name,
                old_value, new_value, price_impact, bom_impact_json, is_applied, applied_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                line.line_id,
                line.change_order_id,
                line.line_no,
                line.entity_type,
                line.entity_id,
                line.field_name,
                line.old_value,
                line.new_value,
                line.price_impact.to_string(),
                bom_json,
                if line.is_applied { 1 } else { 0 },
                line.applied_at.as_ref().map(format_ts),
                format_ts(&line.created_at),
            ],
        )?;
        Ok(())
    }

    /// 行项目 (按行号)
    pub fn find_lines_tx(conn: &Connection, change_order_id: &str) -> RepositoryResult<Vec<ChangeOrderLine>> {
        let sql = format!(
            "SELECT {} FROM change_order_line WHERE change_order_id = ?1 ORDER BY line_no ASC",
            LINE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let lines = stmt
            .query_map(params![change_order_id], map_line)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    /// 未应用的行项目
    pub fn find_unapplied_lines_tx(
        conn: &Connection,
        change_order_id: &str,
    ) -> RepositoryResult<Vec<ChangeOrderLine>> {
        let sql = format!(
            "SELECT {} FROM change_order_line WHERE change_order_id = ?1 AND is_applied = 0 ORDER BY line_no ASC",
            LINE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let lines = stmt
            .query_map(params![change_order_id], map_line)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    pub fn mark_line_applied_tx(
        tx: &Transaction,
        line_id: &str,
        applied_at: &chrono::NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let rows = tx.execute(
            "UPDATE change_order_line SET is_applied = 1, applied_at = ?1 WHERE line_id = ?2 AND is_applied = 0",
            params![format_ts(applied_at), line_id],
        )?;
        Ok(rows)
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_change_order(row: &Row) -> rusqlite::Result<ChangeOrder> {
    let reason_str: String = row.get(5)?;
    let bom_delta_json: String = row.get(10)?;
    let bom_delta: BomDelta = serde_json::from_str(&bom_delta_json)
        .map_err(|e| conversion_error(10, format!("无效 bom_delta_json: {}", e)))?;

    Ok(ChangeOrder {
        change_order_id: row.get(0)?,
        project_id: row.get(1)?,
        change_order_number: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        reason: ChangeOrderReason::parse(&reason_str),
        status: enum_at(row, 6, ChangeOrderStatus::parse)?,
        affected_stage: row.get(7)?,
        unlocks_gate: row.get(8)?,
        price_delta: decimal_at(row, 9)?,
        bom_delta,
        requested_by: row.get(11)?,
        requested_at: ts_at(row, 12)?,
        approved_by: row.get(13)?,
        approved_at: opt_ts_at(row, 14)?,
        approval_notes: row.get(15)?,
        rejected_by: row.get(16)?,
        rejected_at: opt_ts_at(row, 17)?,
        rejection_reason: row.get(18)?,
        applied_by: row.get(19)?,
        applied_at: opt_ts_at(row, 20)?,
        cancelled_by: row.get(21)?,
        cancelled_at: opt_ts_at(row, 22)?,
        revision: row.get(23)?,
        created_at: ts_at(row, 24)?,
        updated_at: ts_at(row, 25)?,
    })
}

fn map_line(row: &Row) -> rusqlite::Result<ChangeOrderLine> {
    let bom_json: Option<String> = row.get(9)?;
    let bom_impact = match bom_json {
        Some(raw) if !raw.trim().is_empty() => Some(
            serde_json::from_str::<BomImpact>(&raw)
                .map_err(|e| conversion_error(9, format!("无效 bom_impact_json: {}", e)))?,
        ),
        _ => None,
    };
    let is_applied: i64 = row.get(10)?;

    Ok(ChangeOrderLine {
        line_id: row.get(0)?,
        change_order_id: row.get(1)?,
        line_no: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        field_name: row.get(5)?,
        old_value: row.get(6)?,
        new_value: row.get(7)?,
        price_impact: decimal_at(row, 8)?,
        bom_impact,
        is_applied: is_applied != 0,
        applied_at: opt_ts_at(row, 11)?,
        created_at: ts_at(row, 12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema, now_ts};

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO project (project_id, name, project_number) VALUES ('P1', 'Kitchen Remodel', 'TCS-0001')",
            [],
        )
        .unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn make_co(id: &str) -> ChangeOrder {
        let now = now_ts();
        ChangeOrder {
            change_order_id: id.to_string(),
            project_id: "P1".to_string(),
            change_order_number: format!("CO-TCS-0001-{}", id),
            title: "Widen sink base".to_string(),
            description: None,
            reason: ChangeOrderReason::ClientRequest,
            status: ChangeOrderStatus::Draft,
            affected_stage: Some("production".to_string()),
            unlocks_gate: None,
            price_delta: Decimal::ZERO,
            bom_delta: BomDelta::default(),
            requested_by: "u1".to_string(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            approval_notes: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            applied_by: None,
            applied_at: None,
            cancelled_by: None,
            cancelled_at: None,
            revision: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn make_line(co_id: &str, no: i32, price: i64) -> ChangeOrderLine {
        ChangeOrderLine {
            line_id: format!("{}-L{}", co_id, no),
            change_order_id: co_id.to_string(),
            line_no: no,
            entity_type: "Cabinet".to_string(),
            entity_id: "C1".to_string(),
            field_name: "width_in".to_string(),
            old_value: Some("30".to_string()),
            new_value: Some("36".to_string()),
            price_impact: Decimal::new(price, 0),
            bom_impact: None,
            is_applied: false,
            applied_at: None,
            created_at: now_ts(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let conn = setup_test_db();
        {
            let mut guard = conn.lock().unwrap();
            let tx = guard.transaction().unwrap();
            let seq = ChangeOrderRepository::next_seq_no_tx(&tx, "P1").unwrap();
            assert_eq!(seq, 1);
            ChangeOrderRepository::insert_tx(&tx, &make_co("CO1"), seq).unwrap();
            assert_eq!(ChangeOrderRepository::next_seq_no_tx(&tx, "P1").unwrap(), 2);
            tx.commit().unwrap();
        }

        let repo = ChangeOrderRepository::new(conn);
        let found = repo.find_by_id("CO1").unwrap().unwrap();
        assert_eq!(found.title, "Widen sink base");
        assert_eq!(found.status, ChangeOrderStatus::Draft);
        assert_eq!(found.revision, 1);
        assert!(repo.find_by_id("missing").unwrap().is_none());
        assert_eq!(repo.list_for_project("P1").unwrap().len(), 1);
    }

    #[test]
    fn test_recalculate_totals_bumps_revision() {
        let conn = setup_test_db();
        let mut guard = conn.lock().unwrap();
        let tx = guard.transaction().unwrap();
        ChangeOrderRepository::insert_tx(&tx, &make_co("CO1"), 1).unwrap();
        ChangeOrderRepository::insert_line_tx(&tx, &make_line("CO1", 1, 500)).unwrap();
        ChangeOrderRepository::insert_line_tx(&tx, &make_line("CO1", 2, 300)).unwrap();

        let (price, _) = ChangeOrderRepository::recalculate_totals_tx(&tx, "CO1").unwrap();
        assert_eq!(price, Decimal::new(800, 0));

        let co = ChangeOrderRepository::get_tx(&tx, "CO1").unwrap();
        assert_eq!(co.price_delta, Decimal::new(800, 0));
        assert_eq!(co.revision, 2);
        assert_eq!(ChangeOrderRepository::next_line_no_tx(&tx, "CO1").unwrap(), 3);
    }

    #[test]
    fn test_transition_cas_conflict() {
        let conn = setup_test_db();
        let mut guard = conn.lock().unwrap();
        let tx = guard.transaction().unwrap();
        ChangeOrderRepository::insert_tx(&tx, &make_co("CO1"), 1).unwrap();

        let mut co = ChangeOrderRepository::get_tx(&tx, "CO1").unwrap();
        co.status = ChangeOrderStatus::PendingApproval;
        let rev = ChangeOrderRepository::transition_tx(&tx, &co, ChangeOrderStatus::Draft).unwrap();
        assert_eq!(rev, 2);

        // 使用过期 revision 再次迁移
        let err = ChangeOrderRepository::transition_tx(&tx, &co, ChangeOrderStatus::Draft).unwrap_err();
        match err {
            RepositoryError::OptimisticLockFailure { expected, actual, .. } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_mark_line_applied_once() {
        let conn = setup_test_db();
        let mut guard = conn.lock().unwrap();
        let tx = guard.transaction().unwrap();
        ChangeOrderRepository::insert_tx(&tx, &make_co("CO1"), 1).unwrap();
        ChangeOrderRepository::insert_line_tx(&tx, &make_line("CO1", 1, 0)).unwrap();

        let now = now_ts();
        assert_eq!(ChangeOrderRepository::mark_line_applied_tx(&tx, "CO1-L1", &now).unwrap(), 1);
        assert_eq!(ChangeOrderRepository::mark_line_applied_tx(&tx, "CO1-L1", &now).unwrap(), 0);
        assert!(ChangeOrderRepository::find_unapplied_lines_tx(&tx, "CO1").unwrap().is_empty());
    }
}
