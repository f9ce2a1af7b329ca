// ==========================================
// 定制橱柜车间 ERP - 变更目标字段读写
// ==========================================
// 职责: 按 (表, 主键列, 字段列) 读取/写入单个字段
// 红线: 表名/列名只接受 'static 字符串 (来自封闭注册表), 值一律参数化
// ==========================================

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::repository::error::RepositoryResult;
use crate::repository::row_codec::value_to_string;

pub struct EntityFieldRepository;

impl EntityFieldRepository {
    /// 读取字段当前值
    ///
    /// # 返回
    /// - Ok(None): 实体不存在
    /// - Ok(Some(None)): 实体存在, 字段为空
    /// - Ok(Some(Some(v))): 字段值 (数值按字面量转成字符串)
    pub fn read_field_tx(
        conn: &Connection,
        table: &'static str,
        key_column: &'static str,
        column: &'static str,
        entity_id: &str,
    ) -> RepositoryResult<Option<Option<String>>> {
        let sql = format!("SELECT {} FROM {} WHERE {} = ?1", column, table, key_column);
        let value: Option<Value> = conn
            .query_row(&sql, params![entity_id], |row| row.get::<_, Value>(0))
            .optional()?;
        Ok(value.map(value_to_string))
    }

    /// 写入字段值, 返回实体是否存在
    pub fn write_field_tx(
        tx: &Transaction,
        table: &'static str,
        key_column: &'static str,
        column: &'static str,
        entity_id: &str,
        value: Option<&str>,
    ) -> RepositoryResult<bool> {
        let sql = format!(
            "UPDATE {} SET {} = ?1, updated_at = datetime('now', 'localtime') WHERE {} = ?2",
            table, column, key_column
        );
        let rows = tx.execute(&sql, params![value, entity_id])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_schema};

    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO project (project_id, name) VALUES ('P1', 'Kitchen');
            INSERT INTO cabinet (cabinet_id, project_id, name, width_in, quantity, finish)
                VALUES ('C1', 'P1', 'Sink base', 30, 1, NULL);
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_read_numeric_and_null() {
        let conn = setup_test_db();
        let width = EntityFieldRepository::read_field_tx(&conn, "cabinet", "cabinet_id", "width_in", "C1").unwrap();
        assert_eq!(width, Some(Some("30".to_string())));

        let finish = EntityFieldRepository::read_field_tx(&conn, "cabinet", "cabinet_id", "finish", "C1").unwrap();
        assert_eq!(finish, Some(None));

        let missing = EntityFieldRepository::read_field_tx(&conn, "cabinet", "cabinet_id", "width_in", "C9").unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_write_field() {
        let mut conn = setup_test_db();
        let tx = conn.transaction().unwrap();
        assert!(EntityFieldRepository::write_field_tx(&tx, "cabinet", "cabinet_id", "width_in", "C1", Some("36")).unwrap());
        assert!(!EntityFieldRepository::write_field_tx(&tx, "cabinet", "cabinet_id", "width_in", "C9", Some("36")).unwrap());

        let width = EntityFieldRepository::read_field_tx(&tx, "cabinet", "cabinet_id", "width_in", "C1").unwrap();
        assert_eq!(width, Some(Some("36".to_string())));
    }
}
