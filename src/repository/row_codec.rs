// ==========================================
// 定制橱柜车间 ERP - 行映射辅助
// ==========================================
// 职责: TEXT 列 → 时间戳 / 金额 / 枚举 的统一转换
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::db::parse_ts;

/// 构造列转换错误
pub(crate) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// 必填时间戳列
pub(crate) fn ts_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).ok_or_else(|| conversion_error(idx, format!("无效时间戳: {}", raw)))
}

/// 可选时间戳列 (无法解析时视为空)
pub(crate) fn opt_ts_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_ts))
}

/// 金额列
pub(crate) fn decimal_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(raw.trim()).map_err(|e| conversion_error(idx, format!("无效金额 {}: {}", raw, e)))
}

/// 用解析函数转换枚举列
pub(crate) fn enum_at<T>(
    row: &rusqlite::Row,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("未知枚举值: {}", raw)))
}

/// 任意列 → 可选字符串 (数值列按字面量输出)
pub(crate) fn value_to_string(value: rusqlite::types::Value) -> Option<String> {
    use rusqlite::types::Value;
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}
