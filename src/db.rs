// ==========================================
// 定制橱柜车间 ERP - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键/busy_timeout)
// - 统一建表脚本, 测试与运行时使用同一份 schema
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 时间戳存储格式
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表 (幂等)
///
/// 说明：
/// - 金额以 TEXT 存储 (rust_decimal), 避免浮点误差
/// - 止停动作的“单条有效记录”约束由部分唯一索引保证
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS project (
            project_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            project_number TEXT,
            stage_key TEXT,
            delivery_date TEXT,
            has_pending_change_order INTEGER NOT NULL DEFAULT 0,
            active_change_order_id TEXT,
            delivery_blocked INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        CREATE TABLE IF NOT EXISTS task (
            task_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES project(project_id),
            title TEXT NOT NULL,
            description TEXT,
            allocated_hours REAL,
            state TEXT NOT NULL,
            blocked_by_change_order_id TEXT,
            state_before_block TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );
        CREATE INDEX IF NOT EXISTS idx_task_project_state ON task(project_id, state);

        CREATE TABLE IF NOT EXISTS purchase_order (
            purchase_order_id TEXT PRIMARY KEY,
            project_id TEXT REFERENCES project(project_id),
            origin TEXT,
            state TEXT NOT NULL,
            held_by_change_order_id TEXT,
            held_at TEXT,
            held_by TEXT,
            state_before_hold TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );
        CREATE INDEX IF NOT EXISTS idx_purchase_order_project ON purchase_order(project_id, state);

        CREATE TABLE IF NOT EXISTS cabinet (
            cabinet_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES project(project_id),
            name TEXT,
            width_in REAL,
            height_in REAL,
            depth_in REAL,
            quantity INTEGER,
            finish TEXT,
            unit_price TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        CREATE TABLE IF NOT EXISTS cabinet_materials_bom (
            bom_line_id TEXT PRIMARY KEY,
            cabinet_id TEXT REFERENCES cabinet(cabinet_id),
            component_name TEXT NOT NULL,
            quantity_required REAL,
            unit_of_measure TEXT,
            unit_cost TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        CREATE TABLE IF NOT EXISTS change_order (
            change_order_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES project(project_id),
            change_order_number TEXT NOT NULL UNIQUE,
            seq_no INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            reason TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN (
                'draft', 'pending_approval', 'approved', 'applied', 'rejected', 'cancelled'
            )),
            affected_stage TEXT,
            unlocks_gate TEXT,
            price_delta TEXT NOT NULL DEFAULT '0',
            bom_delta_json TEXT NOT NULL DEFAULT '{"additions":[],"removals":[]}',
            requested_by TEXT NOT NULL,
            requested_at TEXT NOT NULL,
            approved_by TEXT,
            approved_at TEXT,
            approval_notes TEXT,
            rejected_by TEXT,
            rejected_at TEXT,
            rejection_reason TEXT,
            applied_by TEXT,
            applied_at TEXT,
            cancelled_by TEXT,
            cancelled_at TEXT,
            revision INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(project_id, seq_no)
        );
        CREATE INDEX IF NOT EXISTS idx_change_order_project ON change_order(project_id, status);

        CREATE TABLE IF NOT EXISTS change_order_line (
            line_id TEXT PRIMARY KEY,
            change_order_id TEXT NOT NULL REFERENCES change_order(change_order_id),
            line_no INTEGER NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            price_impact TEXT NOT NULL DEFAULT '0',
            bom_impact_json TEXT,
            is_applied INTEGER NOT NULL DEFAULT 0,
            applied_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(change_order_id, line_no)
        );

        CREATE TABLE IF NOT EXISTS change_order_stop_action (
            stop_action_id TEXT PRIMARY KEY,
            change_order_id TEXT NOT NULL REFERENCES change_order(change_order_id),
            action_type TEXT NOT NULL CHECK(action_type IN ('task_blocked', 'po_held', 'delivery_blocked')),
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            previous_state TEXT,
            new_state TEXT NOT NULL,
            performed_by TEXT NOT NULL,
            performed_at TEXT NOT NULL,
            reverted_by TEXT,
            reverted_at TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_stop_action_active
            ON change_order_stop_action(change_order_id, entity_type, entity_id)
            WHERE reverted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_stop_action_change_order
            ON change_order_stop_action(change_order_id, action_type);

        CREATE TABLE IF NOT EXISTS action_log (
            action_id TEXT PRIMARY KEY,
            change_order_id TEXT,
            project_id TEXT,
            action_type TEXT NOT NULL,
            action_ts TEXT NOT NULL,
            actor TEXT NOT NULL,
            payload_json TEXT,
            detail TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_action_log_change_order ON action_log(change_order_id, action_ts);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )
}

/// 时间戳 → 存储字符串
pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// 存储字符串 → 时间戳 (兼容 RFC3339 / 带 T 分隔)
pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_local()))
}

/// 当前本地时间 (秒级)
pub fn now_ts() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    parse_ts(&format_ts(&now)).unwrap_or(now)
}
