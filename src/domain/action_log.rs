// ==========================================
// 定制橱柜车间 ERP - 操作日志领域模型
// ==========================================
// 红线: 变更单的每一次状态迁移都必须记录
// 用途: 审计追踪 (谁、何时、对哪张变更单做了什么)
// 对齐: action_log 表
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub change_order_id: Option<String>,
    pub project_id: Option<String>,
    pub action_type: String,       // 操作类型 (存储为字符串)
    pub action_ts: NaiveDateTime,
    pub actor: String,
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    CreateChangeOrder,
    AddLine,
    Submit,
    Approve,
    Reject,
    Apply,
    Cancel,
    ExecuteStopActions,
    RevertStopActions,
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreateChangeOrder => "CREATE_CHANGE_ORDER",
            ActionType::AddLine => "ADD_LINE",
            ActionType::Submit => "SUBMIT",
            ActionType::Approve => "APPROVE",
            ActionType::Reject => "REJECT",
            ActionType::Apply => "APPLY",
            ActionType::Cancel => "CANCEL",
            ActionType::ExecuteStopActions => "EXECUTE_STOP_ACTIONS",
            ActionType::RevertStopActions => "REVERT_STOP_ACTIONS",
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE_CHANGE_ORDER" => Some(ActionType::CreateChangeOrder),
            "ADD_LINE" => Some(ActionType::AddLine),
            "SUBMIT" => Some(ActionType::Submit),
            "APPROVE" => Some(ActionType::Approve),
            "REJECT" => Some(ActionType::Reject),
            "APPLY" => Some(ActionType::Apply),
            "CANCEL" => Some(ActionType::Cancel),
            "EXECUTE_STOP_ACTIONS" => Some(ActionType::ExecuteStopActions),
            "REVERT_STOP_ACTIONS" => Some(ActionType::RevertStopActions),
            _ => None,
        }
    }
}

impl ActionLog {
    /// 创建新的操作日志
    pub fn new(action_type: ActionType, actor: &str) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            change_order_id: None,
            project_id: None,
            action_type: action_type.as_str().to_string(),
            action_ts: chrono::Local::now().naive_local(),
            actor: actor.to_string(),
            payload_json: None,
            detail: None,
        }
    }

    /// 关联变更单与项目
    pub fn for_change_order(mut self, change_order_id: &str, project_id: &str) -> Self {
        self.change_order_id = Some(change_order_id.to_string());
        self.project_id = Some(project_id.to_string());
        self
    }

    /// 设置操作负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_roundtrip() {
        for t in [
            ActionType::CreateChangeOrder,
            ActionType::AddLine,
            ActionType::Submit,
            ActionType::Approve,
            ActionType::Reject,
            ActionType::Apply,
            ActionType::Cancel,
            ActionType::ExecuteStopActions,
            ActionType::RevertStopActions,
        ] {
            assert_eq!(ActionType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_builder() {
        let log = ActionLog::new(ActionType::Approve, "u-7")
            .for_change_order("co-1", "p-1")
            .with_payload(&serde_json::json!({"notes": "ok"}))
            .with_detail("批准变更单");

        assert_eq!(log.action_type, "APPROVE");
        assert_eq!(log.change_order_id.as_deref(), Some("co-1"));
        assert_eq!(log.project_id.as_deref(), Some("p-1"));
        assert_eq!(log.payload_json.unwrap()["notes"], "ok");
    }
}
