// ==========================================
// 定制橱柜车间 ERP - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope, 当前仅使用 global)
// ==========================================

use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

// ==========================================
// StaleValuePolicy - 行项目旧值过期策略
// ==========================================
// 应用变更单时, 目标字段当前值与行项目快照 old_value 不一致的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaleValuePolicy {
    #[default]
    Overwrite, // 告警后照常写入 new_value
    Reject,    // 拒绝应用, 整体回滚
}

impl StaleValuePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaleValuePolicy::Overwrite => "OVERWRITE",
            StaleValuePolicy::Reject => "REJECT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "OVERWRITE" => Some(StaleValuePolicy::Overwrite),
            "REJECT" => Some(StaleValuePolicy::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for StaleValuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// ChangeOrderSettings - 变更单引擎配置快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOrderSettings {
    pub number_prefix: String,
    pub po_legacy_origin_match: bool,
    pub stale_value_policy: StaleValuePolicy,
    pub enforce_single_active: bool,
}

impl Default for ChangeOrderSettings {
    fn default() -> Self {
        Self {
            number_prefix: "CO".to_string(),
            po_legacy_origin_match: true,
            stale_value_policy: StaleValuePolicy::Overwrite,
            enforce_single_active: true,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error + Send + Sync>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 配置 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 批准变更单时写入操作日志, 记录执行止停动作时生效的配置
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    // ===== 变更单配置 =====

    /// 读取变更单引擎配置
    ///
    /// 缺失的键使用默认值; 无法解析的值告警后使用默认值
    pub fn load_settings(&self) -> Result<ChangeOrderSettings, Box<dyn Error + Send + Sync>> {
        let defaults = ChangeOrderSettings::default();

        let prefix = self.get_config_or_default(config_keys::NUMBER_PREFIX, &defaults.number_prefix)?;
        let prefix = prefix.trim();
        let number_prefix = if prefix.is_empty() {
            defaults.number_prefix.clone()
        } else {
            prefix.to_string()
        };

        let po_legacy_origin_match = self.get_bool_or_default(
            config_keys::PO_LEGACY_ORIGIN_MATCH,
            defaults.po_legacy_origin_match,
        )?;
        let enforce_single_active = self.get_bool_or_default(
            config_keys::ENFORCE_SINGLE_ACTIVE,
            defaults.enforce_single_active,
        )?;

        let stale_value_policy = match self.get_config_value(config_keys::STALE_VALUE_POLICY)? {
            None => defaults.stale_value_policy,
            Some(raw) => StaleValuePolicy::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    config_key = config_keys::STALE_VALUE_POLICY,
                    raw_value = %raw,
                    "旧值过期策略配置无效，使用默认值 OVERWRITE"
                );
                defaults.stale_value_policy
            }),
        };

        Ok(ChangeOrderSettings {
            number_prefix,
            po_legacy_origin_match,
            stale_value_policy,
            enforce_single_active,
        })
    }

    fn get_bool_or_default(&self, key: &str, default: bool) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let raw = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };
        match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => {
                tracing::warn!(config_key = key, raw_value = %raw, default, "布尔配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 变更单编号前缀
    pub const NUMBER_PREFIX: &str = "change_order.number_prefix";

    // 历史采购单按 origin 文本兜底匹配项目
    pub const PO_LEGACY_ORIGIN_MATCH: &str = "change_order.po_legacy_origin_match";

    // 应用时旧值过期策略 (OVERWRITE / REJECT)
    pub const STALE_VALUE_POLICY: &str = "change_order.stale_value_policy";

    // 同一项目同时仅允许一张变更单处于级联中
    pub const ENFORCE_SINGLE_ACTIVE: &str = "change_order.enforce_single_active";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = setup();
        assert_eq!(config.load_settings().unwrap(), ChangeOrderSettings::default());
        assert_eq!(config.get_config_snapshot().unwrap(), "{}");
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = setup();
        config.set_global_config_value(config_keys::NUMBER_PREFIX, "CHG").unwrap();
        config.set_global_config_value(config_keys::STALE_VALUE_POLICY, "reject").unwrap();
        config.set_global_config_value(config_keys::ENFORCE_SINGLE_ACTIVE, "false").unwrap();
        config.set_global_config_value(config_keys::PO_LEGACY_ORIGIN_MATCH, "maybe").unwrap();

        let settings = config.load_settings().unwrap();
        assert_eq!(settings.number_prefix, "CHG");
        assert_eq!(settings.stale_value_policy, StaleValuePolicy::Reject);
        assert!(!settings.enforce_single_active);
        // 无法解析 → 默认值
        assert!(settings.po_legacy_origin_match);

        config.set_global_config_value(config_keys::STALE_VALUE_POLICY, "bogus").unwrap();
        assert_eq!(config.load_settings().unwrap().stale_value_policy, StaleValuePolicy::Overwrite);

        let snapshot: serde_json::Value = serde_json::from_str(&config.get_config_snapshot().unwrap()).unwrap();
        assert_eq!(snapshot[config_keys::NUMBER_PREFIX], "CHG");
    }
}
